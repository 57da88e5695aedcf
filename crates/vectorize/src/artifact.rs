//! Vector artifact files
//!
//! Vectorization results are saved in one of two forms, told apart by file
//! extension when loaded:
//!
//! - `.json`: a plain map `"{id}?rev={rev}" -> vector`. Vectors are either
//!   lists of floats or base64 strings of little-endian f32, depending on
//!   the [`VectorEncoding`] chosen at save time.
//! - `.zst`: a zstd-compressed MessagePack [`VectorArtifact`], carrying the
//!   technique alongside the vectors.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::info;

use neurosim_core::{EntityKey, FeatureVector, SimilarityError, SimilarityResult};

use crate::engine::VectorizationTechnique;

/// Extension of the plain JSON map
pub const JSON_EXTENSION: &str = "json";

/// Extension of the compressed artifact
pub const COMPRESSED_EXTENSION: &str = "zst";

const ZSTD_LEVEL: i32 = 3;

/// How vectors are written into the JSON map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorEncoding {
    /// List of floats
    #[default]
    Plain,
    /// Base64 of little-endian f32 bytes
    Base64,
}

/// A vector as found in the JSON map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum EncodedVector {
    Plain(FeatureVector),
    Base64(String),
}

/// Base64 of the vector as little-endian f32
pub fn encode_base64(vector: &[f64]) -> String {
    let mut bytes = vec![0u8; vector.len() * 4];
    for (chunk, v) in bytes.chunks_exact_mut(4).zip(vector.iter()) {
        LittleEndian::write_f32(chunk, *v as f32);
    }
    BASE64.encode(&bytes)
}

/// Inverse of [`encode_base64`]
pub fn decode_base64(encoded: &str) -> SimilarityResult<FeatureVector> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| SimilarityError::Serialization(format!("Invalid base64 vector: {}", e)))?;
    if bytes.len() % 4 != 0 {
        return Err(SimilarityError::Serialization(format!(
            "Base64 vector has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| LittleEndian::read_f32(c) as f64)
        .collect())
}

/// A key asked for in a subset registration
///
/// Without a revision it matches the first vector with that id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedKey {
    /// Entity identifier
    pub id: String,
    /// Entity revision, if pinned
    pub rev: Option<u64>,
}

impl RequestedKey {
    /// Ask for any revision of `id`
    pub fn any(id: impl Into<String>) -> Self {
        RequestedKey {
            id: id.into(),
            rev: None,
        }
    }

    /// Ask for one revision of `id`
    pub fn pinned(id: impl Into<String>, rev: u64) -> Self {
        RequestedKey {
            id: id.into(),
            rev: Some(rev),
        }
    }
}

/// Vectors of one model run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorArtifact {
    /// Technique that produced the vectors, when known
    pub technique: Option<VectorizationTechnique>,
    /// Vectors by encoded entity key
    vectors: BTreeMap<String, FeatureVector>,
}

impl VectorArtifact {
    /// Wrap vectorization output
    pub fn new(
        technique: Option<VectorizationTechnique>,
        vectors: &BTreeMap<EntityKey, FeatureVector>,
    ) -> Self {
        VectorArtifact {
            technique,
            vectors: vectors
                .iter()
                .map(|(k, v)| (k.encode(), v.clone()))
                .collect(),
        }
    }

    /// Number of vectors
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Whether there are no vectors
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Dimension of the vectors, taken from the first one
    pub fn vector_dimension(&self) -> Option<usize> {
        self.vectors.values().next().map(Vec::len)
    }

    /// Every vector by parsed entity key
    pub fn vectors(&self) -> SimilarityResult<BTreeMap<EntityKey, FeatureVector>> {
        self.vectors
            .iter()
            .map(|(k, v)| Ok((EntityKey::parse(k)?, v.clone())))
            .collect()
    }

    /// Vectors of a subset of entities
    ///
    /// Returns the requested keys that have no vector, and the vectors that
    /// were found.
    pub fn vectors_for(
        &self,
        requested: &[RequestedKey],
    ) -> SimilarityResult<(Vec<RequestedKey>, BTreeMap<EntityKey, FeatureVector>)> {
        let all = self.vectors()?;
        let mut missing = Vec::new();
        let mut found = BTreeMap::new();

        for req in requested {
            let hit = match req.rev {
                Some(rev) => all.get_key_value(&EntityKey::new(req.id.clone(), rev)),
                None => all.iter().find(|(k, _)| k.id == req.id),
            };
            match hit {
                Some((k, v)) => {
                    found.insert(k.clone(), v.clone());
                }
                None => missing.push(req.clone()),
            }
        }

        Ok((missing, found))
    }

    /// Save as a JSON map
    pub fn save_json(&self, path: &Path, encoding: VectorEncoding) -> SimilarityResult<()> {
        let encoded: BTreeMap<&String, EncodedVector> = self
            .vectors
            .iter()
            .map(|(k, v)| {
                let value = match encoding {
                    VectorEncoding::Plain => EncodedVector::Plain(v.clone()),
                    VectorEncoding::Base64 => EncodedVector::Base64(encode_base64(v)),
                };
                (k, value)
            })
            .collect();

        ensure_parent(path)?;
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &encoded)?;
        info!(target: "neurosim::vectorize", path = %path.display(), count = self.len(), ?encoding, "Saved vector map");
        Ok(())
    }

    /// Save as a compressed artifact
    pub fn save_compressed(&self, path: &Path) -> SimilarityResult<()> {
        let bytes = rmp_serde::to_vec_named(self)?;
        ensure_parent(path)?;
        let file = BufWriter::new(File::create(path)?);
        let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
        std::io::Write::write_all(&mut encoder, &bytes)?;
        encoder.finish()?;
        info!(target: "neurosim::vectorize", path = %path.display(), count = self.len(), "Saved compressed artifact");
        Ok(())
    }

    /// Save in the form the extension names
    pub fn save(&self, path: &Path, encoding: VectorEncoding) -> SimilarityResult<()> {
        match extension(path)? {
            ArtifactKind::Json => self.save_json(path, encoding),
            ArtifactKind::Compressed => self.save_compressed(path),
        }
    }

    /// Load either form, by extension
    pub fn load(path: &Path) -> SimilarityResult<Self> {
        match extension(path)? {
            ArtifactKind::Json => {
                let content = fs::read_to_string(path)?;
                let raw: BTreeMap<String, EncodedVector> = serde_json::from_str(&content)?;
                let vectors = raw
                    .into_iter()
                    .map(|(k, v)| {
                        let vector = match v {
                            EncodedVector::Plain(v) => v,
                            EncodedVector::Base64(s) => decode_base64(&s)?,
                        };
                        Ok((k, vector))
                    })
                    .collect::<SimilarityResult<_>>()?;
                Ok(VectorArtifact {
                    technique: None,
                    vectors,
                })
            }
            ArtifactKind::Compressed => {
                let decoder = zstd::Decoder::new(BufReader::new(File::open(path)?))?;
                Ok(rmp_serde::from_read(decoder)?)
            }
        }
    }
}

enum ArtifactKind {
    Json,
    Compressed,
}

fn extension(path: &Path) -> SimilarityResult<ArtifactKind> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(JSON_EXTENSION) => Ok(ArtifactKind::Json),
        Some(COMPRESSED_EXTENSION) => Ok(ArtifactKind::Compressed),
        _ => Err(SimilarityError::InvalidConfig(format!(
            "Unsupported vector file '{}': expected .{} or .{}",
            path.display(),
            JSON_EXTENSION,
            COMPRESSED_EXTENSION
        ))),
    }
}

fn ensure_parent(path: &Path) -> SimilarityResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
