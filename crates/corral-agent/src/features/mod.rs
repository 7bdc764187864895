pub mod instance_lifecycle;
