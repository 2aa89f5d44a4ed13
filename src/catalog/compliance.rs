//! Compliance tagging for AI-generated imagery
//!
//! Every persisted render carries disclosure flags and a human-readable
//! disclosure line so clients never have to guess whether an image is
//! synthetic.

use crate::catalog::ComplianceFlags;

/// How much of the content hash to surface in the disclosure line.
const DISCLOSURE_HASH_PREFIX_LEN: usize = 12;

/// Produce the flags and disclosure text attached to an asset once a
/// try-on render has been generated for it.
pub fn tag_rendered_asset(content_hash: &str) -> (ComplianceFlags, String) {
    let flags = ComplianceFlags {
        ai_disclosure_applied: true,
        synthetic_watermark_applied: true,
    };
    let prefix = &content_hash[..content_hash.len().min(DISCLOSURE_HASH_PREFIX_LEN)];
    let text = format!(
        "AI-generated try-on preview (ref {prefix}). The rendered garment may differ from the physical product."
    );
    (flags, text)
}
