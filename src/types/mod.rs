// ABOUTME: Validated domain types shared by config, inventory and strategies.
// ABOUTME: Distinct handle newtypes keep container and network ids apart.

mod id;
mod image_ref;
mod service_name;

pub use id::{ContainerId, NetworkId};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use service_name::{ServiceName, ServiceNameError};
