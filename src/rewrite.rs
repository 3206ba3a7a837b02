// SPDX-License-Identifier: Apache-2.0
//! Path helpers shared by the decision engine and the forwarder.
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

/// Characters that cannot appear verbatim in the path of a `Location` header.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Remove `prefix` from the start of `path`. A path reduced to nothing
/// becomes `/`; a path without the prefix is returned unchanged.
pub fn strip_secret_prefix(path: &str, prefix: &str) -> String {
    let stripped = path.strip_prefix(prefix).unwrap_or(path);
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

/// Percent-decode a request path. Invalid UTF-8 sequences are replaced
/// rather than rejected.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// `Location` value for the post-unlock redirect of a decoded path. The
/// stripped path is cleaned first, so the value is always a single rooted
/// path and never a `//host` network-path reference.
pub fn redirect_location(path: &str, prefix: &str) -> String {
    encode_path(&clean_path(&strip_secret_prefix(path, prefix)))
}

/// Lexically clean a path: repeated slashes collapse, `.` segments drop and
/// `..` removes the previous segment without climbing above the root. The
/// result is rooted and keeps a trailing slash if the input had one.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    let mut cleaned = format!("/{}", segments.join("/"));
    if path.ends_with('/') && !cleaned.ends_with('/') {
        cleaned.push('/');
    }
    cleaned
}

/// Wire form of the stripped path. The stripped raw path is used when it
/// still decodes to the stripped path; otherwise the prefix was encoded on
/// the wire (`/secret%5Fpath`, `/cl%C3%A9`) and the decoded result is
/// re-encoded instead.
pub fn strip_raw_prefix(stripped_path: &str, raw_path: &str, prefix: &str) -> String {
    let stripped_raw = strip_secret_prefix(raw_path, prefix);
    if decode_path(&stripped_raw) == stripped_path {
        stripped_raw
    } else {
        encode_path(stripped_path)
    }
}

fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ESCAPES).to_string()
}

/// Join the upstream base URL with an already-encoded request path and
/// optional query. The two paths are joined with exactly one slash.
pub fn upstream_url(base: &Url, raw_path: &str, query: Option<&str>) -> String {
    let base_path = base.path();
    let path = match (base_path.ends_with('/'), raw_path.starts_with('/')) {
        (true, true) => format!("{}{}", base_path, &raw_path[1..]),
        (false, false) => format!("{}/{}", base_path, raw_path),
        _ => format!("{}{}", base_path, raw_path),
    };

    let mut target = format!("{}{}", origin(base), path);
    match (base.query(), query) {
        (Some(base_query), Some(query)) if !base_query.is_empty() && !query.is_empty() => {
            target.push('?');
            target.push_str(base_query);
            target.push('&');
            target.push_str(query);
        }
        (Some(only), None) | (None, Some(only)) | (Some(only), Some("")) | (Some(""), Some(only))
            if !only.is_empty() =>
        {
            target.push('?');
            target.push_str(only);
        }
        _ => {}
    }
    target
}

fn origin(base: &Url) -> String {
    let mut origin = format!("{}://", base.scheme());
    if let Some(host) = base.host_str() {
        origin.push_str(host);
    }
    if let Some(port) = base.port() {
        origin.push(':');
        origin.push_str(&port.to_string());
    }
    origin
}
