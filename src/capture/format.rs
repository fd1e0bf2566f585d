use super::device::CaptureDevice;

/// Ordered encoding-format preference list
///
/// More specific codec combinations first, generic WebM last. The first
/// candidate the device accepts wins.
pub const FORMAT_PREFERENCES: [&str; 4] = [
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=h264,opus",
    "video/webm;codecs=vp9,opus",
    "video/webm",
];

/// Pick the best format the device supports, walking the preference list in
/// order. Returns `None` when the device rejects every candidate.
pub fn negotiate_format(device: &dyn CaptureDevice) -> Option<&'static str> {
    FORMAT_PREFERENCES
        .iter()
        .copied()
        .find(|candidate| device.supports_format(candidate))
}
