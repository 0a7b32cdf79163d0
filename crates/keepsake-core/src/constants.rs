//! Application-wide constants.

/// Prefix shared by derivative ids and names: a derivative of `abc` is `thumb-abc`.
pub const DERIVATIVE_PREFIX: &str = "thumb-";

/// Edge length in pixels of every generated preview. Images are cropped to a
/// `DERIVATIVE_EDGE` square; video frames are scaled to this width.
pub const DERIVATIVE_EDGE: u32 = 150;

/// Content type of every derivative, regardless of the source format.
pub const DERIVATIVE_CONTENT_TYPE: &str = "image/jpeg";

/// JPEG quality used when encoding image previews.
pub const DERIVATIVE_JPEG_QUALITY: u8 = 85;
