// Domain models

mod container;
mod event;
mod resource;

pub use container::{
    CloneLabels, ContainerRecord, ContainerSnapshot, ContainerStatus, LABEL_CREATED_BY,
    LABEL_IS_CLONE, LABEL_PARENT, SHORT_ID_LEN, short_id,
};
pub use event::RuntimeEvent;
pub use resource::{ImageInfo, NetworkInfo, ResourceKind, VolumeInfo};
