//! Splits a fully-qualified domain name into its leaf subdomain labels and
//! its registrable domain, respecting multi-label public suffixes (`co.uk`,
//! `github.io`, ...) so WPAD candidate derivation never probes a bare public
//! suffix like `http://wpad.co.uk/wpad.dat`.

pub trait PublicSuffixResolver: Send + Sync {
    /// Returns `(subdomain_labels, registrable_domain)`, leftmost label
    /// first in `subdomain_labels`. `None` if `fqdn` has no registrable
    /// domain at all (bare public suffix, single label, malformed input).
    fn split(&self, fqdn: &str) -> Option<(Vec<String>, String)>;
}

#[derive(Default)]
pub struct PslResolver;

impl PublicSuffixResolver for PslResolver {
    fn split(&self, fqdn: &str) -> Option<(Vec<String>, String)> {
        let domain = psl::domain(fqdn.as_bytes())?;
        let registrable = std::str::from_utf8(domain.as_bytes()).ok()?.to_string();

        if registrable.len() == fqdn.len() {
            return Some((Vec::new(), registrable));
        }
        let prefix_len = fqdn.len().checked_sub(registrable.len() + 1)?;
        let prefix = &fqdn[..prefix_len];
        if prefix.is_empty() {
            return Some((Vec::new(), registrable));
        }
        let labels = prefix.split('.').map(str::to_string).collect();
        Some((labels, registrable))
    }
}
