mod cache;
mod controller;
mod gate;
mod tabs;

pub use controller::SessionCoordinator;
