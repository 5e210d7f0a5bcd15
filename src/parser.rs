// Slice-based STOMP frame parser (produces owned Vecs from input slices)

use crate::error::ConnError;
use crate::frame::is_valid_command;

/// A frame cut out of the read buffer, before header decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub command: String,
    /// Raw header lines split on the first `:`, still escaped.
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Bytes of input the frame occupied, including the NUL and an
    /// optional trailing LF.
    pub consumed: usize,
}

/// Extract the optional content-length header value from a header list.
///
/// Returns:
/// - Ok(Some(n)) when a valid content-length header is present and parsed.
/// - Ok(None) when no content-length header is present.
/// - Err when content-length is present but not a valid unsigned integer.
fn get_content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, ConnError> {
    let Some((_, v)) = headers.iter().find(|(k, _)| k.as_slice() == b"content-length") else {
        return Ok(None);
    };
    let s = std::str::from_utf8(v)
        .map_err(|e| ConnError::InvalidContentLength(format!("not utf8: {}", e)))?;
    let trimmed = s.trim();
    trimmed
        .parse::<usize>()
        .map(Some)
        .map_err(|e| ConnError::InvalidContentLength(format!("'{}': {}", trimmed, e)))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Parse a single STOMP frame from the front of `input`.
///
/// The caller has already consumed heartbeat line feeds. Returns
/// `Ok(Some(frame))` when a complete frame is available, `Ok(None)` when
/// more bytes are needed, and `Err` for an unknown command, a header line
/// without a colon, or a bad content-length.
///
/// A nonzero `content-length` dictates an exact body read followed by a
/// mandatory NUL. A `content-length` of zero, or none at all, means the
/// body runs to the next NUL.
pub fn parse_frame_slice(input: &[u8]) -> Result<Option<ParsedFrame>, ConnError> {
    let len = input.len();
    let mut pos = 0usize;

    // command line
    let Some(cmd_end) = input.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let cmd_bytes = strip_cr(&input[..cmd_end]);
    let command = match std::str::from_utf8(cmd_bytes) {
        Ok(c) if is_valid_command(c) => c.to_string(),
        _ => {
            return Err(ConnError::UnknownCommand(
                String::from_utf8_lossy(cmd_bytes).into_owned(),
            ));
        }
    };
    pos += cmd_end + 1;

    // header lines until an empty line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        if pos >= len {
            return Ok(None);
        }
        let Some(line_end_rel) = input[pos..].iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line = strip_cr(&input[pos..pos + line_end_rel]);
        pos += line_end_rel + 1;
        if line.is_empty() {
            break;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec())),
            None => {
                return Err(ConnError::HeaderCorrupt(
                    String::from_utf8_lossy(line).into_owned(),
                ));
            }
        }
    }

    // body
    let body = match get_content_length(&headers)? {
        Some(content_len) if content_len > 0 => {
            let Some(body_end) = pos.checked_add(content_len) else {
                return Err(ConnError::InvalidContentLength(format!(
                    "{} overflows the frame size",
                    content_len
                )));
            };
            if body_end >= len {
                return Ok(None);
            }
            let body = input[pos..body_end].to_vec();
            pos = body_end;
            if input[pos] != 0 {
                return Err(ConnError::InvalidContentLength(format!(
                    "no NUL after {} body bytes",
                    content_len
                )));
            }
            pos += 1;
            body
        }
        _ => {
            let Some(nul_rel) = input[pos..].iter().position(|&b| b == 0) else {
                return Ok(None);
            };
            let body = input[pos..pos + nul_rel].to_vec();
            pos += nul_rel + 1;
            body
        }
    };

    // optional trailing LF
    if pos < len && input[pos] == b'\n' {
        pos += 1;
    }

    Ok(Some(ParsedFrame {
        command,
        headers,
        body,
        consumed: pos,
    }))
}
