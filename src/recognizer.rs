//! QR recognition: the recognizer contract and the rqrr-backed implementation

use std::fmt;

use rqrr::{BitGrid, Grid, PreparedImage, SimpleGrid};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::capture::LumaImage;
use crate::error::DecodeError;

/// Error-correction strength, ordered weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EccLevel {
    L,
    M,
    Q,
    H,
}

impl EccLevel {
    /// Map the two-bit format code read from the symbol (`M L H Q` order)
    pub fn from_format_bits(bits: u16) -> Option<Self> {
        match bits {
            0 => Some(EccLevel::M),
            1 => Some(EccLevel::L),
            2 => Some(EccLevel::H),
            3 => Some(EccLevel::Q),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            EccLevel::L => 'L',
            EccLevel::M => 'M',
            EccLevel::Q => 'Q',
            EccLevel::H => 'H',
        }
    }
}

impl fmt::Display for EccLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SymbolType {
    Qr,
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolType::Qr => write!(f, "QR"),
        }
    }
}

/// A successfully decoded symbol.
///
/// Equality and hashing cover every field, so two sightings only count as
/// the same symbol when all of them match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedRecord {
    pub payload: Vec<u8>,
    pub version: usize,
    pub ecc_level: EccLevel,
    pub mask: u16,
    pub symbol_type: SymbolType,
}

impl DecodedRecord {
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Frame-at-a-time symbol recognizer.
///
/// A frame is `begin_frame` (fill the returned buffer), `end_frame`
/// (locate candidates), then any number of `candidate`/`decode` calls.
pub trait Recognizer {
    type Candidate;

    /// Destination buffer for the next frame, sized to the working resolution
    fn begin_frame(&mut self) -> &mut LumaImage;

    /// Submit the filled buffer and locate candidates
    fn end_frame(&mut self);

    fn candidate_count(&self) -> usize;

    fn candidate(&self, index: usize) -> Option<&Self::Candidate>;

    fn decode(&self, candidate: &Self::Candidate) -> Result<DecodedRecord, DecodeError>;

    /// Decode candidate `index` of the current frame
    fn decode_at(&self, index: usize) -> Result<DecodedRecord, DecodeError> {
        let candidate = self
            .candidate(index)
            .ok_or(DecodeError::NoCandidate(index))?;
        self.decode(candidate)
    }
}

/// QR recognizer backed by `rqrr`
pub struct QrRecognizer {
    image: LumaImage,
    grids: Vec<Grid<SimpleGrid>>,
}

impl QrRecognizer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            image: LumaImage::new(width, height),
            grids: Vec::new(),
        }
    }

    pub fn backend() -> &'static str {
        "rqrr"
    }
}

impl Recognizer for QrRecognizer {
    type Candidate = Grid<SimpleGrid>;

    fn begin_frame(&mut self) -> &mut LumaImage {
        self.grids.clear();
        &mut self.image
    }

    fn end_frame(&mut self) {
        let image = &self.image;
        let mut prepared =
            PreparedImage::prepare_from_greyscale(image.width(), image.height(), |x, y| {
                image.pixel(x, y)
            });
        // Detected grids borrow the prepared image; sample them into owned
        // bitmaps so candidates outlive this call. `bit` takes (y, x).
        self.grids = prepared
            .detect_grids()
            .into_iter()
            .map(|g| Grid {
                bounds: g.bounds,
                grid: SimpleGrid::from_func(g.grid.size(), |x, y| g.grid.bit(y, x)),
            })
            .collect();
        trace!(count = self.grids.len(), "Located candidates");
    }

    fn candidate_count(&self) -> usize {
        self.grids.len()
    }

    fn candidate(&self, index: usize) -> Option<&Self::Candidate> {
        self.grids.get(index)
    }

    fn decode(&self, candidate: &Self::Candidate) -> Result<DecodedRecord, DecodeError> {
        let mut payload = Vec::new();
        let meta = candidate
            .decode_to(&mut payload)
            .map_err(|e| DecodeError::Symbol(format!("{e:?}")))?;
        let ecc_level = EccLevel::from_format_bits(meta.ecc_level).ok_or_else(|| {
            DecodeError::Symbol(format!("invalid ECC level code {}", meta.ecc_level))
        })?;

        Ok(DecodedRecord {
            payload,
            version: meta.version.0,
            ecc_level,
            mask: meta.mask,
            symbol_type: SymbolType::Qr,
        })
    }
}
