//! Minimal TLS ClientHello parser.
//!
//! Only walks as far as the `server_name` extension. Anything malformed,
//! truncated or not a ClientHello yields `None`.

pub const RECORD_HEADER_LEN: usize = 5;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Body length announced by a handshake record header.
pub fn record_length(header: &[u8]) -> Option<usize> {
    if header.len() < RECORD_HEADER_LEN || header[0] != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    Some(u16::from_be_bytes([header[3], header[4]]) as usize)
}

/// Extract the lowercased SNI host name from the first TLS record.
pub fn server_name(data: &[u8]) -> Option<String> {
    let mut record = Reader::new(data);
    if record.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    record.skip(2)?;
    let record_len = record.u16()? as usize;
    let mut handshake = Reader::new(record.take(record_len)?);

    if handshake.u8()? != HANDSHAKE_CLIENT_HELLO {
        return None;
    }
    let hello_len = handshake.u24()?;
    let mut hello = Reader::new(handshake.take(hello_len)?);

    // legacy_version + random
    hello.skip(2 + 32)?;
    let session_id = hello.u8()? as usize;
    hello.skip(session_id)?;
    let cipher_suites = hello.u16()? as usize;
    hello.skip(cipher_suites)?;
    let compression = hello.u8()? as usize;
    hello.skip(compression)?;

    if hello.is_empty() {
        return None;
    }
    let extensions_len = hello.u16()? as usize;
    let mut extensions = Reader::new(hello.take(extensions_len)?);
    while !extensions.is_empty() {
        let kind = extensions.u16()?;
        let len = extensions.u16()? as usize;
        let body = extensions.take(len)?;
        if kind == EXTENSION_SERVER_NAME {
            return host_name(body);
        }
    }
    None
}

fn host_name(extension: &[u8]) -> Option<String> {
    let mut ext = Reader::new(extension);
    let list_len = ext.u16()? as usize;
    let mut list = Reader::new(ext.take(list_len)?);
    while !list.is_empty() {
        let kind = list.u8()?;
        let len = list.u16()? as usize;
        let name = list.take(len)?;
        if kind == NAME_TYPE_HOST_NAME {
            let name = std::str::from_utf8(name).ok()?.trim_end_matches('.');
            if name.is_empty() {
                return None;
            }
            return Some(name.to_ascii_lowercase());
        }
    }
    None
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A ClientHello carrying `host` (if any) plus one unrelated extension.
    pub(crate) fn client_hello(host: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();
        // supported_versions, to make sure unrelated extensions are skipped
        extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);
        if let Some(host) = host {
            let name = host.as_bytes();
            let mut sni = Vec::new();
            sni.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
            sni.push(NAME_TYPE_HOST_NAME);
            sni.extend_from_slice(&(name.len() as u16).to_be_bytes());
            sni.extend_from_slice(name);
            extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&(sni.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&sni);
        }

        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[7u8; 32]);
        hello.push(0);
        hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
        hello.extend_from_slice(&[0x01, 0x00]);
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn test_extracts_server_name() {
        let hello = client_hello(Some("Secure.Example.com"));
        assert_eq!(server_name(&hello).as_deref(), Some("secure.example.com"));
        assert_eq!(record_length(&hello), Some(hello.len() - RECORD_HEADER_LEN));
    }

    #[test]
    fn test_no_extension_means_no_name() {
        assert_eq!(server_name(&client_hello(None)), None);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let hello = client_hello(Some("example.com"));
        assert_eq!(server_name(&hello[..hello.len() - 4]), None);
    }

    #[test]
    fn test_plain_http_is_not_tls() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert_eq!(server_name(request), None);
        assert_eq!(record_length(request), None);
    }
}
