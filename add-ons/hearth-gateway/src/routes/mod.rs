pub mod audio;
pub mod mqtt;
pub mod ota;
