pub mod api;
pub mod db;
pub mod extract;
pub mod load;
pub mod registry;
pub mod staging;
pub mod tracing;
pub mod transform;

pub mod util {
    pub mod env;
}
