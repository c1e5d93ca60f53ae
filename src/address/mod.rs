// Package address resolves instance addresses into absolute endpoints.
//
// An instance address is either absolute (`scheme://host:port[/path]`) or
// site-relative (`/site2-a`), the latter living behind the client's own origin.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("missing addr")]
    Missing,
    #[error("invalid address {address:?}: {message}")]
    Invalid { address: String, message: String },
}

/// Joins two path pieces with exactly one `/` between them.
pub fn join_path(base: &str, segment: &str) -> String {
    let mut out = String::with_capacity(base.len() + segment.len() + 1);
    out.push_str(base);
    if !out.ends_with('/') {
        out.push('/');
    }
    out.push_str(segment.strip_prefix('/').unwrap_or(segment));
    out
}

/// Resolves `address` to an absolute URL. Relative addresses are joined
/// against the scheme/host/port of `origin`; any path on `origin` is ignored.
pub fn resolve(address: &str, origin: &Url) -> Result<Url, AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Missing);
    }

    let absolute = if address.starts_with('/') {
        join_path(&origin.origin().ascii_serialization(), address)
    } else {
        address.to_string()
    };

    parse(&absolute, address)
}

/// Resolves `address` and appends `segment` (e.g. `ping`, `invoke`).
pub fn endpoint(address: &str, origin: &Url, segment: &str) -> Result<Url, AddressError> {
    let base = resolve(address, origin)?;
    parse(&join_path(base.as_str(), segment), address)
}

fn parse(raw: &str, address: &str) -> Result<Url, AddressError> {
    let url = Url::parse(raw).map_err(|e| AddressError::Invalid {
        address: address.to_string(),
        message: e.to_string(),
    })?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(AddressError::Invalid {
            address: address.to_string(),
            message: "address has no host".to_string(),
        });
    }
    Ok(url)
}
