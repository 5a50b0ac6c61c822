pub mod client;
pub mod dispatcher;
pub mod group_manager;
pub mod presence;
pub mod session;
pub mod user_manager;

pub use client::{ClientHandle, ClientId, SessionShared};
pub use dispatcher::PublishDispatcher;
pub use group_manager::GroupManager;
pub use presence::Presence;
pub use session::{Session, SessionQueues, SessionServices};
pub use user_manager::UserManager;
