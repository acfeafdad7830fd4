//! Metadata/decoder collaborator used by import and thumbnail selection.

use chrono::{NaiveDate, NaiveDateTime};
use image::DynamicImage;
use std::io::Cursor;

use crate::error::{Error, Result};

/// Capture details read from a file's embedded metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureInfo {
    pub taken_at: Option<NaiveDateTime>,
    pub camera: Option<String>,
}

pub trait MetadataReader: Send + Sync {
    /// Pixel dimensions of the encoded image.
    fn read_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)>;

    /// A smaller preview image embedded in the file, if any.
    fn read_embedded_preview(&self, bytes: &[u8]) -> Option<DynamicImage>;

    fn read_capture_info(&self, bytes: &[u8]) -> CaptureInfo;
}

/// Reads dimensions with `image` and EXIF fields with `kamadak-exif`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifMetadataReader;

impl ExifMetadataReader {
    fn read_exif(bytes: &[u8]) -> Option<exif::Exif> {
        exif::Reader::new()
            .read_from_container(&mut Cursor::new(bytes))
            .ok()
    }
}

impl MetadataReader for ExifMetadataReader {
    fn read_dimensions(&self, bytes: &[u8]) -> Result<(u32, u32)> {
        let (width, height) = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(Error::Corrupt {
                path: Default::default(),
                reason: "zero image dimension".to_string(),
            });
        }
        Ok((width, height))
    }

    fn read_embedded_preview(&self, bytes: &[u8]) -> Option<DynamicImage> {
        let exif = Self::read_exif(bytes)?;
        let offset = exif
            .get_field(exif::Tag::JPEGInterchangeFormat, exif::In::THUMBNAIL)?
            .value
            .get_uint(0)? as usize;
        let length = exif
            .get_field(exif::Tag::JPEGInterchangeFormatLength, exif::In::THUMBNAIL)?
            .value
            .get_uint(0)? as usize;

        let buf = exif.buf();
        let end = offset.checked_add(length)?;
        if length == 0 || end > buf.len() {
            return None;
        }
        image::load_from_memory(&buf[offset..end]).ok()
    }

    fn read_capture_info(&self, bytes: &[u8]) -> CaptureInfo {
        let mut info = CaptureInfo::default();
        let Some(exif) = Self::read_exif(bytes) else {
            return info;
        };

        if let Some(field) = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY) {
            if let exif::Value::Ascii(ref values) = field.value {
                if let Some(dt) = values
                    .first()
                    .and_then(|raw| exif::DateTime::from_ascii(raw).ok())
                {
                    info.taken_at = NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)
                        .and_then(|d| d.and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32));
                }
            }
        }

        let make = exif
            .get_field(exif::Tag::Make, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').trim().to_string());
        let model = exif
            .get_field(exif::Tag::Model, exif::In::PRIMARY)
            .map(|f| f.display_value().to_string().trim_matches('"').trim().to_string());
        info.camera = match (make, model) {
            (Some(make), Some(model)) if model.starts_with(&make) => Some(model),
            (Some(make), Some(model)) => Some(format!("{} {}", make, model)),
            (make, model) => make.or(model),
        };

        info
    }
}
