//! Identifier generation helpers

use sipflow_sip_core::types::via::BRANCH_MAGIC_COOKIE;

/// Generates an RFC 3261 branch parameter (magic cookie + random suffix)
pub fn generate_branch() -> String {
    format!("{}{:016x}", BRANCH_MAGIC_COOKIE, fastrand::u64(..))
}

/// Generates a From/To tag
pub fn generate_tag() -> String {
    format!("{:08x}", fastrand::u32(..))
}

/// Generates a Call-ID
pub fn generate_call_id() -> String {
    format!("{:016x}{:016x}", fastrand::u64(..), fastrand::u64(..))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_carries_magic_cookie() {
        let branch = generate_branch();
        assert!(branch.starts_with(BRANCH_MAGIC_COOKIE));
        assert!(branch.len() > BRANCH_MAGIC_COOKIE.len());
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(generate_branch(), generate_branch());
        assert_ne!(generate_tag(), generate_tag());
        assert_ne!(generate_call_id(), generate_call_id());
    }
}
