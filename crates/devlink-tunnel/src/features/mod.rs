pub mod connect_tunnel;
pub mod inspector_tunnel;
