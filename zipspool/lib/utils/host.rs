use crate::{ZipspoolError, ZipspoolResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the identifier of this host as used in temporary container names.
///
/// Characters that cannot appear in a file name are replaced with `_`.
pub fn host_identifier() -> ZipspoolResult<String> {
    let hostname = nix::unistd::gethostname().map_err(|e| ZipspoolError::Io(e.into()))?;
    let hostname = sanitize_host(&hostname.to_string_lossy());
    if hostname.is_empty() {
        return Ok("localhost".to_string());
    }

    Ok(hostname)
}

fn sanitize_host(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
