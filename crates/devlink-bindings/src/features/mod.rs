pub mod object_binding;
pub mod service_binding;
