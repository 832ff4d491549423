use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::Path;
use tiny_http::{Header, Response};

pub type JsonResponse = Response<Cursor<Vec<u8>>>;

pub fn add_cors_headers<R: std::io::Read>(response: Response<R>) -> Response<R> {
    response
        .with_header(cors_header("Access-Control-Allow-Origin", "*"))
        .with_header(cors_header(
            "Access-Control-Allow-Methods",
            "GET, POST, OPTIONS",
        ))
        .with_header(cors_header("Access-Control-Allow-Headers", "Content-Type"))
}

fn cors_header(name: &str, value: &str) -> Header {
    // Both halves are static ASCII, so this cannot fail.
    Header::from_bytes(name.as_bytes(), value.as_bytes()).expect("valid header")
}

pub fn json_response<T: Serialize>(status: u16, body: &T) -> JsonResponse {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    add_cors_headers(
        Response::from_data(bytes)
            .with_status_code(status)
            .with_header(cors_header("Content-Type", "application/json")),
    )
}

pub fn error_response(status: u16, code: &str, message: &str) -> JsonResponse {
    json_response(
        status,
        &serde_json::json!({ "error": code, "message": message }),
    )
}

/// Extracts the first file part of a multipart body. Works on raw bytes so
/// binary uploads survive intact.
pub fn parse_multipart(body: &[u8], boundary: &str) -> Result<(String, Vec<u8>), String> {
    let boundary = boundary.trim_matches('"');
    if boundary.is_empty() {
        return Err("Missing multipart boundary".to_string());
    }
    let delimiter = format!("--{}", boundary).into_bytes();

    let mut rest = body;
    while let Some(start) = find(rest, &delimiter) {
        rest = &rest[start + delimiter.len()..];
        let Some(header_end) = find(rest, b"\r\n\r\n") else {
            break;
        };
        let headers = String::from_utf8_lossy(&rest[..header_end]);
        let data = &rest[header_end + 4..];
        let data_end = find(data, &[b"\r\n".as_slice(), delimiter.as_slice()].concat())
            .unwrap_or(data.len());

        if headers.contains("Content-Disposition") && headers.contains("filename=") {
            let filename = headers
                .lines()
                .find(|line| line.contains("filename="))
                .and_then(|line| {
                    line.split("filename=\"")
                        .nth(1)
                        .and_then(|s| s.split('"').next())
                })
                .filter(|name| !name.is_empty())
                .unwrap_or("uploaded_file")
                .to_string();

            return Ok((filename, data[..data_end].to_vec()));
        }
        rest = &data[data_end..];
    }

    Err("No file found in multipart data".to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Strips any client-supplied directory components from an upload name.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(&['/', '\\'][..]).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        "uploaded_file".to_string()
    } else {
        base.to_string()
    }
}

/// Streams a file through SHA-256 without loading it whole.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn multipart(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                b = boundary,
                f = filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        body
    }

    #[test]
    fn file_hash_of_known_inputs() {
        let empty = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(sha256_file(empty.path()).unwrap(), EMPTY_SHA256);

        let mut abc = tempfile::NamedTempFile::new().unwrap();
        abc.write_all(b"abc").unwrap();
        assert_eq!(
            sha256_file(abc.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn file_hash_spans_read_buffers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        assert_eq!(
            sha256_file(file.path()).unwrap(),
            format!("{:x}", Sha256::digest(&data))
        );
    }

    #[test]
    fn multipart_keeps_binary_bytes() {
        let data = [0x4d, 0x5a, 0x00, 0xff, 0xfe, b'\r', b'\n', 0x90];
        let body = multipart("XyZ", "tool.exe", &data);
        let (name, bytes) = parse_multipart(&body, "XyZ").unwrap();
        assert_eq!(name, "tool.exe");
        assert_eq!(bytes, data);
    }

    #[test]
    fn multipart_without_file_part() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\n1\r\n--b--\r\n";
        assert!(parse_multipart(body, "b").is_err());
        assert!(parse_multipart(body, "").is_err());
    }

    #[test]
    fn filenames_lose_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\x\\evil.bat"), "evil.bat");
        assert_eq!(sanitize_filename(".."), "uploaded_file");
        assert_eq!(sanitize_filename(""), "uploaded_file");
    }
}
