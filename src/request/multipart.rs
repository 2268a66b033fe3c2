//! `multipart/form-data` body parsing

use bytes::Bytes;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{FileItem, RawRequest};
use crate::config::Upload;
use crate::core::error::{RuntimeError, RuntimeResult};
use crate::core::traits::UploadParser;

static BOUNDARY_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)boundary\s*=\s*(?:"([^"]+)"|([^;\s]+))"#).expect("valid boundary regex")
});

static DISPOSITION_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*(name|filename)\s*=\s*(?:"([^"]*)"|([^;]*))"#)
        .expect("valid disposition regex")
});

/// Default upload parser, enforcing the configured size limits
#[derive(Debug, Clone, Default)]
pub struct MultipartUploadParser {
    size_max: u64,
    file_size_max: u64,
}

impl MultipartUploadParser {
    pub fn new(config: &Upload) -> Self {
        Self {
            size_max: config.size_max,
            file_size_max: config.file_size_max,
        }
    }
}

impl UploadParser for MultipartUploadParser {
    fn parse_request(&self, request: &RawRequest) -> RuntimeResult<Vec<FileItem>> {
        let content_type = request
            .content_type()
            .ok_or_else(|| upload_error("missing content type"))?;
        let boundary = boundary_of(content_type)?;

        let body = request.body();
        if self.size_max > 0 && body.len() as u64 > self.size_max {
            return Err(upload_error(format!(
                "request size {} exceeds the configured maximum {}",
                body.len(),
                self.size_max
            )));
        }

        let items = parse_parts(body, &boundary, self.file_size_max)?;
        debug!("Parsed {} multipart items", items.len());
        Ok(items)
    }
}

fn upload_error(msg: impl Into<String>) -> RuntimeError {
    RuntimeError::UploadParse(msg.into())
}

pub fn boundary_of(content_type: &str) -> RuntimeResult<String> {
    BOUNDARY_PARAM
        .captures(content_type)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| upload_error("multipart boundary not found"))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}

fn parse_parts(body: &Bytes, boundary: &str, file_size_max: u64) -> RuntimeResult<Vec<FileItem>> {
    let delimiter = format!("--{boundary}").into_bytes();
    let part_end = [b"\r\n".as_slice(), delimiter.as_slice()].concat();

    let mut pos = find(body, &delimiter, 0).ok_or_else(|| upload_error("opening boundary not found"))?;
    let mut items = Vec::new();

    loop {
        pos += delimiter.len();
        let rest = body.get(pos..).unwrap_or_default();
        if rest.starts_with(b"--") {
            return Ok(items);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(upload_error("malformed boundary line"));
        }
        pos += 2;

        let header_end = find(body, b"\r\n\r\n", pos)
            .ok_or_else(|| upload_error("unterminated part headers"))?;
        let headers = std::str::from_utf8(&body[pos..header_end])
            .map_err(|_| upload_error("part headers are not valid UTF-8"))?;
        let data_start = header_end + 4;
        let data_end = find(body, &part_end, data_start)
            .ok_or_else(|| upload_error("closing boundary not found"))?;

        let item = build_item(headers, body.slice(data_start..data_end))?;
        if !item.is_form_field() && file_size_max > 0 && item.size() as u64 > file_size_max {
            return Err(upload_error(format!(
                "file '{}' of {} bytes exceeds the configured maximum {}",
                item.field_name(),
                item.size(),
                file_size_max
            )));
        }
        items.push(item);
        pos = data_end + 2;
    }
}

fn build_item(headers: &str, data: Bytes) -> RuntimeResult<FileItem> {
    let mut name = None;
    let mut file_name = None;
    let mut content_type = None;

    for line in headers.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("content-disposition") {
            for caps in DISPOSITION_PARAM.captures_iter(value) {
                let param = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().trim().to_string());
                match caps[1].to_ascii_lowercase().as_str() {
                    "name" => name = param,
                    "filename" => file_name = param,
                    _ => {}
                }
            }
        } else if key.eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let name = name.ok_or_else(|| upload_error("part without a field name"))?;
    Ok(match file_name {
        Some(file_name) => FileItem::file(name, file_name, content_type, data),
        None => FileItem::form_field(name, data),
    })
}
