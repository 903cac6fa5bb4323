pub mod hit;
pub mod paint;
pub mod viewport;

pub use hit::{node_at, nodes_in_rect, resize_handle_at};
pub use paint::{DisplayList, DrawCmd, Overlay, paint};
pub use viewport::{Surface, Viewport, snap_to_device_pixel};
