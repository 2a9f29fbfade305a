//! Outils de test partagés: caméra simulée par mockall

use std::time::Duration;

use camctl_camera::{
    AccessMode, BufferId, CameraControl, CameraError, DeviceInfo, GrabResult, Limits,
    RegisterValue, SchemaNode, Transport,
};
use mockall::mock;

mock! {
    pub Camera {}

    impl CameraControl for Camera {
        fn device_info(&self) -> &DeviceInfo;
        fn open(&mut self) -> Result<(), CameraError>;
        fn close(&mut self) -> Result<(), CameraError>;
        fn is_open(&self) -> bool;
        fn access_mode(&self, name: &str) -> AccessMode;
        fn get(&self, name: &str) -> Result<RegisterValue, CameraError>;
        fn set(&mut self, name: &str, value: RegisterValue) -> Result<(), CameraError>;
        fn symbolics(&self, name: &str) -> Result<Vec<String>, CameraError>;
        fn limits(&self, name: &str) -> Result<Limits, CameraError>;
        fn execute(&mut self, command: &str) -> Result<(), CameraError>;
        fn start_grabbing(&mut self, max_frames: Option<u64>) -> Result<(), CameraError>;
        fn stop_grabbing(&mut self) -> Result<(), CameraError>;
        fn is_grabbing(&self) -> bool;
        fn wait_for_frame_trigger_ready(&mut self, timeout: Duration) -> Result<(), CameraError>;
        fn retrieve_result(&mut self, timeout: Duration) -> Result<GrabResult, CameraError>;
        fn release_result(&mut self, buffer: BufferId) -> Result<(), CameraError>;
        fn parameter_schema(&self) -> Result<SchemaNode, CameraError>;
    }
}

pub fn device_info() -> DeviceInfo {
    DeviceInfo {
        friendly_name: "Basler acA1920-25gm (mock)".to_string(),
        full_name: "mock#acA1920-25gm".to_string(),
        model_name: "acA1920-25gm".to_string(),
        vendor_name: "Basler".to_string(),
        serial_number: "mock".to_string(),
        user_defined_name: String::new(),
        device_class: "BaslerGigE".to_string(),
        ip_address: None,
        transport: Transport::GigE,
    }
}
