//! HTTP Digest auth HA2 helper and body MD5.
//!
//! Grounded on `original_source/child.c::kworker_child_bodymd5`: the
//! components are concatenated as `method ":" script uri ":" body` — note
//! there is deliberately no separator between `script` and `uri`, matching
//! the source exactly rather than "fixing" what looks like a missing `:`.
//! The parent's interpretation of the resulting digest depends on matching
//! this construction, so it is preserved as-is.

use md5::{Digest, Md5};

/// Compute the RFC 2617 HA2 component: `MD5(method ":" script uri ":"
/// body)`. Missing components are treated as empty strings by the caller
/// (pass `""`).
pub fn compute_ha2(method: &str, script_name: &str, path_info: &str, body: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(method.as_bytes());
    hasher.update(b":");
    hasher.update(script_name.as_bytes());
    hasher.update(path_info.as_bytes());
    hasher.update(b":");
    hasher.update(body);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ha2_matches_direct_md5_construction() {
        let digest = compute_ha2("GET", "/cgi-bin/app", "/extra", b"body-bytes");
        let mut hasher = Md5::new();
        hasher.update(b"GET:/cgi-bin/app/extrabody-bytes".to_vec());
        wait_matches(hasher, digest);
    }

    fn wait_matches(hasher: Md5, digest: [u8; 16]) {
        let expected: [u8; 16] = hasher.finalize().into();
        assert_eq!(expected, digest);
    }

    #[test]
    fn empty_components_still_produce_a_digest() {
        let digest = compute_ha2("", "", "", b"");
        assert_eq!(digest.len(), 16);
    }
}
