//! Built-in voice styles, read from the model's `voices.npz`.
//!
//! Each archive member is a 2-D little/big-endian `float32` matrix; row `i`
//! is the style vector used for an utterance of `i` characters. NPZ is a ZIP
//! archive of `.npy` members, so only the NPY header needs parsing here.

use std::{collections::BTreeMap, io::Read, path::Path};

use anyhow::{bail, ensure, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use zip::ZipArchive;

static RE_DESCR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]descr['"]\s*:\s*['"]([^'"]+)['"]"#).unwrap());
static RE_FORTRAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]fortran_order['"]\s*:\s*(True|False)"#).unwrap());
static RE_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"['"]shape['"]\s*:\s*\(([^)]*)\)"#).unwrap());

/// One voice: `rows × dim` style vectors, row-major.
#[derive(Debug, Clone)]
pub struct StyleMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl StyleMatrix {
    pub fn new(rows: usize, dim: usize, data: Vec<f32>) -> Result<Self> {
        ensure!(rows > 0 && dim > 0, "empty style matrix ({rows}x{dim})");
        ensure!(
            data.len() == rows * dim,
            "style matrix has {} values, expected {rows}x{dim}",
            data.len()
        );
        Ok(Self { rows, dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Style row for an utterance of `text_len` characters, clamped to the
    /// last row.
    pub fn row(&self, text_len: usize) -> &[f32] {
        let i = text_len.min(self.rows - 1);
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// Decode an NPY buffer holding a float32 array of any rank.
///
/// Returns the shape and the values in C order.
pub fn parse_npy(bytes: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    ensure!(bytes.len() >= 10 && bytes.starts_with(b"\x93NUMPY"), "not an NPY buffer");

    let (header_len, offset) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            ensure!(bytes.len() >= 12, "truncated NPY v{} preamble", bytes[6]);
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => bail!("unsupported NPY version {v}"),
    };
    let body_start = offset + header_len;
    ensure!(bytes.len() >= body_start, "truncated NPY header");
    let header = std::str::from_utf8(&bytes[offset..body_start]).context("NPY header is not UTF-8")?;

    let descr = RE_DESCR
        .captures(header)
        .map(|c| c[1].to_string())
        .context("NPY header has no dtype")?;
    let big_endian = match descr.as_str() {
        "<f4" | "=f4" | "|f4" => false,
        ">f4" => true,
        other => bail!("unsupported dtype {other:?}, expected float32"),
    };
    if RE_FORTRAN.captures(header).is_some_and(|c| &c[1] == "True") {
        bail!("Fortran-ordered arrays are not supported");
    }
    let shape: Vec<usize> = RE_SHAPE
        .captures(header)
        .context("NPY header has no shape")?[1]
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse().with_context(|| format!("bad shape dimension {d:?}")))
        .collect::<Result<_>>()?;

    let count: usize = shape.iter().product();
    let body = &bytes[body_start..];
    ensure!(
        body.len() >= count * 4,
        "NPY body has {} bytes, expected {}",
        body.len(),
        count * 4
    );
    let values = body[..count * 4]
        .chunks_exact(4)
        .map(|b| {
            let b = [b[0], b[1], b[2], b[3]];
            if big_endian { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }
        })
        .collect();
    Ok((shape, values))
}

/// All voices shipped with a model, plus their aliases and speed priors.
#[derive(Debug, Default)]
pub struct VoiceTable {
    voices: BTreeMap<String, StyleMatrix>,
    aliases: BTreeMap<String, String>,
    speed_priors: BTreeMap<String, f32>,
}

impl VoiceTable {
    /// Read every `.npy` member of an NPZ archive as a voice.
    pub fn load_npz(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open voices file: {}", path.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("Not a ZIP/NPZ archive: {}", path.display()))?;

        let mut voices = BTreeMap::new();
        for i in 0..archive.len() {
            let mut member = archive.by_index(i).context("Cannot read NPZ member")?;
            let name = member.name().trim_end_matches(".npy").to_string();
            let mut buf = Vec::with_capacity(member.size() as usize);
            member.read_to_end(&mut buf)?;

            let (shape, data) =
                parse_npy(&buf).with_context(|| format!("Bad voice array '{name}'"))?;
            let (rows, dim) = match shape.as_slice() {
                [d] => (1, *d),
                [r, d] => (*r, *d),
                other => bail!("voice '{name}' has unsupported shape {other:?}"),
            };
            voices.insert(name, StyleMatrix::new(rows, dim, data)?);
        }
        ensure!(!voices.is_empty(), "no voices in {}", path.display());
        Ok(Self { voices, ..Default::default() })
    }

    pub fn with_aliases(
        mut self,
        aliases: impl IntoIterator<Item = (String, String)>,
        speed_priors: impl IntoIterator<Item = (String, f32)>,
    ) -> Self {
        self.aliases.extend(aliases);
        self.speed_priors.extend(speed_priors);
        self
    }

    /// Canonical voice names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.voices.keys().map(String::as_str)
    }

    /// Resolve an alias (e.g. `"Jasper"`) to its archive key.
    pub fn resolve<'a>(&'a self, voice: &'a str) -> &'a str {
        self.aliases.get(voice).map(String::as_str).unwrap_or(voice)
    }

    pub fn get(&self, voice: &str) -> Result<&StyleMatrix> {
        let key = self.resolve(voice);
        self.voices.get(key).with_context(|| {
            format!("Unknown voice '{voice}'. Available: {:?}", self.names().collect::<Vec<_>>())
        })
    }

    /// Per-voice speed multiplier, 1.0 when the manifest has none.
    pub fn speed_prior(&self, voice: &str) -> f32 {
        self.speed_priors.get(self.resolve(voice)).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn npy(shape: &[usize], values: &[f32]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        let mut header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
            dims.join(", ")
        );
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut out = b"\x93NUMPY\x01\x00".to_vec();
        out.extend_from_slice(&(header.len() as u16).to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_npy_2d() {
        let values: Vec<f32> = (0..6).map(|x| x as f32).collect();
        let (shape, data) = parse_npy(&npy(&[2, 3], &values)).unwrap();
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(data, values);
    }

    #[test]
    fn test_parse_npy_rejects_garbage() {
        assert!(parse_npy(b"NOTANPY...").is_err());
        let mut f64_npy = npy(&[1], &[1.0]);
        let pos = f64_npy.windows(3).position(|w| w == b"<f4").unwrap();
        f64_npy[pos + 2] = b'8';
        assert!(parse_npy(&f64_npy).is_err());
    }

    #[test]
    fn test_style_row_clamps() {
        let m = StyleMatrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m.row(0), &[1.0, 2.0]);
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.row(400), &[3.0, 4.0]);
        assert!(StyleMatrix::new(2, 2, vec![1.0]).is_err());
    }

    #[test]
    fn test_load_npz_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voices.npz");
        {
            let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
            let opts = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("expr-voice-2-m.npy", opts).unwrap();
            zip.write_all(&npy(&[2, 4], &[0.5; 8])).unwrap();
            zip.finish().unwrap();
        }

        let table = VoiceTable::load_npz(&path).unwrap().with_aliases(
            [("Jasper".to_string(), "expr-voice-2-m".to_string())],
            [("expr-voice-2-m".to_string(), 0.8)],
        );
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["expr-voice-2-m"]);
        assert_eq!(table.get("Jasper").unwrap().dim(), 4);
        assert_eq!(table.speed_prior("Jasper"), 0.8);
        assert!(table.get("Nobody").is_err());
    }
}
