pub mod device_fingerprint;

pub use device_fingerprint::generate_device_fingerprint;
