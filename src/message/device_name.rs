/// Register 0x05: the name the BMS reports for itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceName(pub String);

impl DeviceName {
    pub fn decode(payload: &[u8]) -> Self {
        let name = String::from_utf8_lossy(payload);
        Self(name.trim_end_matches('\0').trim().to_string())
    }
}

#[test]
fn test_decode_device_name() {
    let name = DeviceName::decode(b"JBD-SP04S034-L4S\0\0");
    assert_eq!(name, DeviceName("JBD-SP04S034-L4S".to_string()));
}
