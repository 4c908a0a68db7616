//! Web font packaging.
//!
//! TrueType/OpenType sources are copied and wrapped as WOFF (zlib) and
//! WOFF2 (brotli, null table transforms). Other font formats are copied.
//! An `.otf` keeps its CFF outlines, so no `.ttf` is derived from it.

use std::io::Write;
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use rayon::prelude::*;

use crate::traits::{
    read_source, OutputFile, SourceFile, Transform, TransformContext, TransformError,
    TransformOutput,
};

const WOFF_SIGNATURE: u32 = 0x774F_4646;
const WOFF2_SIGNATURE: u32 = 0x774F_4632;
const SFNT_HEADER_LEN: usize = 12;
const SFNT_ENTRY_LEN: usize = 16;

/// Packages fonts for the web.
#[derive(Debug, Clone, Copy, Default)]
pub struct FontTransform;

impl FontTransform {
    fn package(&self, source: &SourceFile) -> Result<Vec<OutputFile>, TransformError> {
        let data = read_source(&source.path)?;
        let mut files = vec![OutputFile::new(source.relative.clone(), data.clone())];

        if is_sfnt_source(source) {
            let font = Sfnt::parse(&data)?;
            files.push(OutputFile::new(
                source.relative.with_extension("woff"),
                encode_woff(&font)?,
            ));
            files.push(OutputFile::new(
                source.relative.with_extension("woff2"),
                encode_woff2(&font)?,
            ));
        }
        Ok(files)
    }
}

impl Transform for FontTransform {
    fn name(&self) -> &'static str {
        "fonts"
    }

    fn run(&self, inputs: &[SourceFile], _ctx: &TransformContext) -> TransformOutput {
        let results: Vec<(PathBuf, Result<Vec<OutputFile>, TransformError>)> = inputs
            .par_iter()
            .map(|s| (s.path.clone(), self.package(s)))
            .collect();

        let mut output = TransformOutput::default();
        for (path, result) in results {
            match result {
                Ok(files) => files.into_iter().for_each(|f| output.push_file(f)),
                Err(e) => output.push_failure(&path, e),
            }
        }
        output
    }

    fn primary_output(&self, source: &SourceFile) -> PathBuf {
        if is_sfnt_source(source) {
            source.relative.with_extension("woff2")
        } else {
            source.relative.clone()
        }
    }
}

fn is_sfnt_source(source: &SourceFile) -> bool {
    matches!(source.extension().as_str(), "ttf" | "otf")
}

/// A single table of an sfnt font.
#[derive(Debug, Clone)]
pub struct Table<'a> {
    pub tag: [u8; 4],
    pub checksum: u32,
    pub data: &'a [u8],
}

/// A parsed TrueType/OpenType font, tables sorted by tag.
#[derive(Debug, Clone)]
pub struct Sfnt<'a> {
    pub flavor: u32,
    pub tables: Vec<Table<'a>>,
}

impl<'a> Sfnt<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, TransformError> {
        let flavor = read_u32(data, 0)?;
        if !matches!(flavor, 0x0001_0000 | 0x4F54_544F | 0x7472_7565) {
            return Err(TransformError::Font(format!(
                "unsupported sfnt version 0x{flavor:08x}"
            )));
        }
        let num_tables = read_u16(data, 4)? as usize;

        let mut tables = Vec::with_capacity(num_tables);
        for i in 0..num_tables {
            let entry = SFNT_HEADER_LEN + i * SFNT_ENTRY_LEN;
            let tag_bytes = data
                .get(entry..entry + 4)
                .ok_or_else(|| TransformError::Font("truncated table directory".to_string()))?;
            let mut tag = [0u8; 4];
            tag.copy_from_slice(tag_bytes);

            let checksum = read_u32(data, entry + 4)?;
            let offset = read_u32(data, entry + 8)? as usize;
            let length = read_u32(data, entry + 12)? as usize;
            let table = data.get(offset..offset + length).ok_or_else(|| {
                TransformError::Font(format!(
                    "table {} out of bounds",
                    String::from_utf8_lossy(&tag)
                ))
            })?;

            tables.push(Table {
                tag,
                checksum,
                data: table,
            });
        }
        tables.sort_by_key(|t| t.tag);

        Ok(Self { flavor, tables })
    }

    /// Size of the uncompressed font including table padding.
    pub fn sfnt_size(&self) -> u32 {
        let tables: usize = self.tables.iter().map(|t| pad4(t.data.len())).sum();
        (SFNT_HEADER_LEN + SFNT_ENTRY_LEN * self.tables.len() + tables) as u32
    }
}

/// Wrap a font as WOFF 1.0.
pub fn encode_woff(font: &Sfnt<'_>) -> Result<Vec<u8>, TransformError> {
    const HEADER_LEN: usize = 44;
    const ENTRY_LEN: usize = 20;

    let mut compressed = Vec::with_capacity(font.tables.len());
    for table in &font.tables {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder
            .write_all(table.data)
            .map_err(|e| TransformError::Font(e.to_string()))?;
        let packed = encoder
            .finish()
            .map_err(|e| TransformError::Font(e.to_string()))?;
        // Tables that do not shrink are stored uncompressed.
        if packed.len() < table.data.len() {
            compressed.push(packed);
        } else {
            compressed.push(table.data.to_vec());
        }
    }

    let mut offset = HEADER_LEN + ENTRY_LEN * font.tables.len();
    let mut directory = Vec::with_capacity(ENTRY_LEN * font.tables.len());
    let mut body = Vec::new();
    for (table, data) in font.tables.iter().zip(&compressed) {
        directory.extend_from_slice(&table.tag);
        directory.extend_from_slice(&(offset as u32).to_be_bytes());
        directory.extend_from_slice(&(data.len() as u32).to_be_bytes());
        directory.extend_from_slice(&(table.data.len() as u32).to_be_bytes());
        directory.extend_from_slice(&table.checksum.to_be_bytes());

        body.extend_from_slice(data);
        body.resize(pad4(body.len()), 0);
        offset = HEADER_LEN + ENTRY_LEN * font.tables.len() + body.len();
    }

    let total = HEADER_LEN + directory.len() + body.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&WOFF_SIGNATURE.to_be_bytes());
    out.extend_from_slice(&font.flavor.to_be_bytes());
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(font.tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&font.sfnt_size().to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    // metaOffset, metaLength, metaOrigLength, privOffset, privLength
    out.extend_from_slice(&[0u8; 20]);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Wrap a font as WOFF2 using null transforms for every table.
pub fn encode_woff2(font: &Sfnt<'_>) -> Result<Vec<u8>, TransformError> {
    const HEADER_LEN: usize = 48;
    const ARBITRARY_TAG: u8 = 63;
    const NULL_TRANSFORM_GLYF: u8 = 3 << 6;

    let mut directory = Vec::new();
    let mut stream = Vec::new();
    for table in &font.tables {
        let flags = if &table.tag == b"glyf" || &table.tag == b"loca" {
            ARBITRARY_TAG | NULL_TRANSFORM_GLYF
        } else {
            ARBITRARY_TAG
        };
        directory.push(flags);
        directory.extend_from_slice(&table.tag);
        write_base128(&mut directory, table.data.len() as u32);
        stream.extend_from_slice(table.data);
    }

    let mut writer = brotli::CompressorWriter::new(Vec::new(), 4096, 11, 22);
    writer
        .write_all(&stream)
        .map_err(|e| TransformError::Font(e.to_string()))?;
    let compressed = writer.into_inner();

    let total = pad4(HEADER_LEN + directory.len() + compressed.len());
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&WOFF2_SIGNATURE.to_be_bytes());
    out.extend_from_slice(&font.flavor.to_be_bytes());
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(&(font.tables.len() as u16).to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&font.sfnt_size().to_be_bytes());
    out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&[0u8; 20]);
    out.extend_from_slice(&directory);
    out.extend_from_slice(&compressed);
    out.resize(total, 0);
    Ok(out)
}

/// UIntBase128: big-endian 7-bit groups, high bit marks continuation.
fn write_base128(out: &mut Vec<u8>, value: u32) {
    let mut groups = [0u8; 5];
    let mut len = 0;
    let mut v = value;
    loop {
        groups[len] = (v & 0x7F) as u8;
        len += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..len).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(groups[i] | continuation);
    }
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

fn read_u16(data: &[u8], at: usize) -> Result<u16, TransformError> {
    data.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| TransformError::Font("truncated font header".to_string()))
}

fn read_u32(data: &[u8], at: usize) -> Result<u32, TransformError> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| TransformError::Font("truncated font header".to_string()))
}
