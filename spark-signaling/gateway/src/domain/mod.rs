pub mod model;
pub mod repository;

pub use model::{
    CallbackPayload, DeliveryKind, EMessage, GROUP_CAPACITY, Group, GroupKind,
};
pub use repository::{
    DeviceRegistry, LoginPointRecord, LoginPointStore, RelationStore, TokenStore,
};
