//! WebM duration repair
//!
//! Chunked encoders stream WebM without a global Duration element in the
//! Segment Info, so players report an unknown or wrong length for the
//! finished clip. This module walks just enough EBML to patch an existing
//! Duration in place, or insert one, using the elapsed wall-clock time of
//! the session. Buffers that do not parse as EBML (including the empty
//! clip) are returned unchanged.

use std::time::Duration;
use tracing::warn;

const EBML_HEADER_ID: u32 = 0x1A45_DFA3;
const SEGMENT_ID: u32 = 0x1853_8067;
const INFO_ID: u32 = 0x1549_A966;
const TIMECODE_SCALE_ID: u32 = 0x2A_D7B1;
const DURATION_ID: u32 = 0x4489;

/// Nanoseconds per timecode tick when the Info carries no TimecodeScale
const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Rewrite (or insert) the container's Duration header
///
/// Returns the repaired buffer, or the input unchanged when it cannot be
/// parsed far enough to locate the Segment Info.
pub fn set_duration(data: &[u8], elapsed: Duration) -> Vec<u8> {
    match try_set_duration(data, elapsed) {
        Some(out) => out,
        None => {
            warn!(
                bytes = data.len(),
                "duration repair skipped: buffer is not parseable webm"
            );
            data.to_vec()
        }
    }
}

/// Declared container duration, if the buffer carries one
pub fn clip_duration(data: &[u8]) -> Option<Duration> {
    let segment = find_segment(data)?;
    let seg_end = segment_end(data, &segment)?;
    let info = find_child(data, segment.data_start, seg_end, INFO_ID)?;
    let info_end = info.data_start + info.data_size?;
    if info_end > data.len() {
        return None;
    }

    let scale = timecode_scale(data, &info, info_end);
    let duration = find_child(data, info.data_start, info_end, DURATION_ID)?;
    let ticks = read_float(data, &duration)?;
    if !ticks.is_finite() || ticks < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((ticks * scale as f64) as u64))
}

fn try_set_duration(data: &[u8], elapsed: Duration) -> Option<Vec<u8>> {
    let segment = find_segment(data)?;
    let seg_end = segment_end(data, &segment)?;
    let info = find_child(data, segment.data_start, seg_end, INFO_ID)?;
    let info_size = info.data_size?;
    let info_end = info.data_start + info_size;
    if info_end > data.len() {
        return None;
    }

    let scale = timecode_scale(data, &info, info_end);
    if scale == 0 {
        return None;
    }
    let ticks = elapsed.as_nanos() as f64 / scale as f64;

    // Existing Duration: patch the float payload in place, keeping its width
    if let Some(duration) = find_child(data, info.data_start, info_end, DURATION_ID) {
        let size = duration.data_size?;
        let mut out = data.to_vec();
        match size {
            4 => out[duration.data_start..duration.data_start + 4]
                .copy_from_slice(&(ticks as f32).to_be_bytes()),
            8 => out[duration.data_start..duration.data_start + 8]
                .copy_from_slice(&ticks.to_be_bytes()),
            _ => return None,
        }
        return Some(out);
    }

    // No Duration: append an 8-byte float element to the Info payload and
    // re-encode the sizes above it
    let mut duration_element = vec![0x44, 0x89, 0x88];
    duration_element.extend_from_slice(&ticks.to_be_bytes());

    let mut new_info = Vec::new();
    new_info.extend_from_slice(&data[info.header_start..info.size_off]);
    new_info.extend_from_slice(&encode_size((info_size + duration_element.len()) as u64));
    new_info.extend_from_slice(&data[info.data_start..info_end]);
    new_info.extend_from_slice(&duration_element);

    let info_growth = new_info.len() - (info_end - info.header_start);

    let mut out = Vec::with_capacity(data.len() + info_growth);
    match segment.data_size {
        // Unknown-size Segment extends to the end of the buffer; splicing
        // the grown Info needs no size bookkeeping above it
        None => {
            out.extend_from_slice(&data[..info.header_start]);
            out.extend_from_slice(&new_info);
            out.extend_from_slice(&data[info_end..]);
        }
        Some(seg_size) => {
            out.extend_from_slice(&data[..segment.size_off]);
            out.extend_from_slice(&encode_size((seg_size + info_growth) as u64));
            out.extend_from_slice(&data[segment.data_start..info.header_start]);
            out.extend_from_slice(&new_info);
            out.extend_from_slice(&data[info_end..]);
        }
    }
    Some(out)
}

/// One parsed EBML element header
struct Element {
    id: u32,
    header_start: usize,
    size_off: usize,
    data_start: usize,
    /// `None` for the unknown-size marker
    data_size: Option<usize>,
}

fn read_element(data: &[u8], pos: usize) -> Option<Element> {
    let (id, id_len) = read_id(data, pos)?;
    let size_off = pos + id_len;
    let (data_size, size_len) = read_size(data, size_off)?;
    Some(Element {
        id,
        header_start: pos,
        size_off,
        data_start: size_off + size_len,
        data_size,
    })
}

/// EBML id: 1-4 bytes, marker bit kept in the value
fn read_id(data: &[u8], pos: usize) -> Option<(u32, usize)> {
    let first = *data.get(pos)?;
    let len = match first {
        b if b & 0x80 != 0 => 1,
        b if b & 0x40 != 0 => 2,
        b if b & 0x20 != 0 => 3,
        b if b & 0x10 != 0 => 4,
        _ => return None,
    };
    if pos + len > data.len() {
        return None;
    }
    let mut id: u32 = 0;
    for &byte in &data[pos..pos + len] {
        id = (id << 8) | byte as u32;
    }
    Some((id, len))
}

/// EBML size: 1-8 bytes, marker bit stripped; all-ones means unknown size
fn read_size(data: &[u8], pos: usize) -> Option<(Option<usize>, usize)> {
    let first = *data.get(pos)?;
    if first == 0 {
        return None;
    }
    let len = (first.leading_zeros() + 1) as usize;
    if pos + len > data.len() {
        return None;
    }
    let mut value: u64 = (first & (0xFF >> len)) as u64;
    for &byte in &data[pos + 1..pos + len] {
        value = (value << 8) | byte as u64;
    }
    let unknown = value == (1u64 << (7 * len)) - 1;
    if unknown {
        Some((None, len))
    } else {
        Some((Some(value as usize), len))
    }
}

fn find_segment(data: &[u8]) -> Option<Element> {
    let mut pos = 0;
    while pos < data.len() {
        let element = read_element(data, pos)?;
        if element.id == SEGMENT_ID {
            return Some(element);
        }
        // Only the Segment may be unknown-size at the top level
        if element.id != EBML_HEADER_ID && element.data_size.is_none() {
            return None;
        }
        pos = element.data_start + element.data_size?;
    }
    None
}

fn segment_end(data: &[u8], segment: &Element) -> Option<usize> {
    let end = match segment.data_size {
        Some(size) => segment.data_start + size,
        None => data.len(),
    };
    (end <= data.len()).then_some(end)
}

fn find_child(data: &[u8], start: usize, end: usize, id: u32) -> Option<Element> {
    let mut pos = start;
    while pos < end {
        let element = read_element(data, pos)?;
        if element.id == id {
            return Some(element);
        }
        pos = element.data_start + element.data_size?;
    }
    None
}

fn timecode_scale(data: &[u8], info: &Element, info_end: usize) -> u64 {
    find_child(data, info.data_start, info_end, TIMECODE_SCALE_ID)
        .and_then(|e| read_uint(data, &e))
        .unwrap_or(DEFAULT_TIMECODE_SCALE)
}

fn read_uint(data: &[u8], element: &Element) -> Option<u64> {
    let size = element.data_size?;
    if size == 0 || size > 8 || element.data_start + size > data.len() {
        return None;
    }
    let mut value: u64 = 0;
    for &byte in &data[element.data_start..element.data_start + size] {
        value = (value << 8) | byte as u64;
    }
    Some(value)
}

fn read_float(data: &[u8], element: &Element) -> Option<f64> {
    let size = element.data_size?;
    if element.data_start + size > data.len() {
        return None;
    }
    let bytes = &data[element.data_start..element.data_start + size];
    match size {
        4 => Some(f32::from_be_bytes(bytes.try_into().ok()?) as f64),
        8 => Some(f64::from_be_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn encode_size(value: u64) -> Vec<u8> {
    let mut len = 1;
    while len < 8 && value >= (1u64 << (7 * len)) - 1 {
        len += 1;
    }
    let mut bytes = vec![0u8; len];
    let mut v = value;
    for slot in bytes.iter_mut().rev() {
        *slot = (v & 0xFF) as u8;
        v >>= 8;
    }
    bytes[0] |= 0x80 >> (len - 1);
    bytes
}
