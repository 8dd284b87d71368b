//! Small shared helpers: etags, id allocation, pending-read flags

use md5::{Digest, Md5};

/// Creates a new unique ETag for a resource.
///
/// The tag is the MD5 of the current time's textual representation,
/// surrounded by quotation marks as required for HTTP validators.
#[must_use]
pub fn make_etag() -> String {
    let now = chrono::Utc::now().format("%H:%M:%S%.3f").to_string();
    let digest = Md5::digest(now.as_bytes());
    let mut tag = String::with_capacity(34);
    tag.push('"');
    for byte in digest {
        tag.push_str(&format!("{byte:02x}"));
    }
    tag.push('"');
    tag
}

/// Strip the surrounding quotes of an etag for external payloads.
#[must_use]
pub fn etag_unquoted(etag: &str) -> &str {
    etag.trim_matches('"')
}

/// Returns the smallest unused positive integer id, as a string.
///
/// `used` yields the ids already taken; non-numeric ids are ignored.
pub fn next_free_id<'a, I>(used: I) -> String
where
    I: Iterator<Item = &'a str>,
{
    let taken: Vec<u32> = used.filter_map(|id| id.parse().ok()).collect();
    let mut candidate = 1u32;
    while taken.contains(&candidate) {
        candidate += 1;
    }
    candidate.to_string()
}

/// Pending attribute read flags for lights and sensors.
pub mod read_flags {
    pub const VENDOR_NAME: u32 = 1 << 0;
    pub const MODEL_ID: u32 = 1 << 1;
    pub const SWBUILD_ID: u32 = 1 << 2;
    pub const ON_OFF: u32 = 1 << 3;
    pub const LEVEL: u32 = 1 << 4;
    pub const COLOR: u32 = 1 << 5;
    pub const GROUPS: u32 = 1 << 6;
    pub const SCENES: u32 = 1 << 7;
    pub const SCENE_DETAILS: u32 = 1 << 8;
    pub const BINDING_TABLE: u32 = 1 << 9;
    pub const GROUP_IDENTIFIERS: u32 = 1 << 10;
    pub const OCCUPANCY_CONFIG: u32 = 1 << 11;
    pub const WRITE_OCCUPANCY_CONFIG: u32 = 1 << 12;
}
