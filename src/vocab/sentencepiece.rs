//! SentencePiece `tokenizer.model` reader
//!
//! Decodes just enough of the `ModelProto` wire format to recover the piece
//! table and the trainer's special ids:
//!
//! * field 1, repeated `SentencePiece { piece = 1, score = 2, type = 3 }`
//! * field 2, `TrainerSpec { unk_id = 40, bos_id = 41, eos_id = 42, pad_id = 43 }`
//!
//! Everything else is skipped by wire type.

use super::piece::PieceSource;
use super::special::{SpecialToken, SpecialTokens};
use crate::error::{ConvertError, Result};
use std::path::{Path, PathBuf};

/// File holding the piece-score model
pub const PIECE_MODEL_FILE: &str = "tokenizer.model";

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_FIXED32: u32 = 5;

const MODEL_PIECES: u32 = 1;
const MODEL_TRAINER_SPEC: u32 = 2;

const PIECE_TEXT: u32 = 1;
const PIECE_SCORE: u32 = 2;
const PIECE_TYPE: u32 = 3;

const TRAINER_UNK_ID: u32 = 40;
const TRAINER_BOS_ID: u32 = 41;
const TRAINER_EOS_ID: u32 = 42;
const TRAINER_PAD_ID: u32 = 43;

/// Piece classification as stored in the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl PieceType {
    fn from_wire(value: u64) -> Self {
        match value {
            2 => Self::Unknown,
            3 => Self::Control,
            4 => Self::UserDefined,
            5 => Self::Unused,
            6 => Self::Byte,
            _ => Self::Normal,
        }
    }
}

/// One entry of the piece table
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub text: String,
    pub score: f32,
    pub kind: PieceType,
}

/// Trainer special ids; negative means the role is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrainerIds {
    unk: i32,
    bos: i32,
    eos: i32,
    pad: i32,
}

impl Default for TrainerIds {
    // proto2 defaults of TrainerSpec
    fn default() -> Self {
        Self {
            unk: 0,
            bos: 1,
            eos: 2,
            pad: -1,
        }
    }
}

/// Parsed SentencePiece model
#[derive(Debug, Clone, PartialEq)]
pub struct SentencePieceModel {
    pieces: Vec<Piece>,
    trainer: TrainerIds,
}

impl SentencePieceModel {
    /// Load `tokenizer.model` from a checkpoint directory
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, or
    /// [`ConvertError::TokenizerParse`] if it is not a valid model.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(PIECE_MODEL_FILE);
        let data = std::fs::read(&path)?;
        Self::from_bytes(&data).map_err(|message| parse_error(path, message))
    }

    /// Decode a serialized `ModelProto`
    ///
    /// # Errors
    ///
    /// Returns a message describing the first malformed field.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, String> {
        let mut reader = ProtobufReader::new(data);
        let mut pieces = Vec::new();
        let mut trainer = TrainerIds::default();

        while reader.has_more() {
            let (field, wire) = reader.read_tag()?;
            match (field, wire) {
                (MODEL_PIECES, WIRE_LEN) => pieces.push(parse_piece(reader.read_bytes()?)?),
                (MODEL_TRAINER_SPEC, WIRE_LEN) => parse_trainer(reader.read_bytes()?, &mut trainer)?,
                _ => reader.skip(wire)?,
            }
        }

        if pieces.is_empty() {
            return Err("model has no pieces".into());
        }
        Ok(Self { pieces, trainer })
    }

    /// The piece table in id order
    #[must_use]
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    fn piece(&self, id: u32) -> Option<&Piece> {
        self.pieces.get(id as usize)
    }

    fn kind_is(&self, id: u32, kind: PieceType) -> bool {
        self.piece(id).is_some_and(|p| p.kind == kind)
    }
}

impl PieceSource for SentencePieceModel {
    fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    fn id_to_piece(&self, id: u32) -> Option<&str> {
        self.piece(id).map(|p| p.text.as_str())
    }

    fn score(&self, id: u32) -> f32 {
        self.piece(id).map_or(0.0, |p| p.score)
    }

    fn is_unknown(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Unknown)
    }

    fn is_control(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Control)
    }

    fn is_unused(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Unused)
    }

    fn is_byte(&self, id: u32) -> bool {
        self.kind_is(id, PieceType::Byte)
    }

    fn special_ids(&self) -> SpecialTokens {
        let mut tokens = SpecialTokens::default();
        let declared = [
            (SpecialToken::Unk, self.trainer.unk),
            (SpecialToken::Bos, self.trainer.bos),
            (SpecialToken::Eos, self.trainer.eos),
            (SpecialToken::Pad, self.trainer.pad),
        ];
        for (token, id) in declared {
            if let Ok(id) = u32::try_from(id) {
                tokens.set(token, id);
            }
        }
        tokens
    }
}

fn parse_error(file: PathBuf, message: String) -> ConvertError {
    ConvertError::TokenizerParse { file, message }
}

fn parse_piece(data: &[u8]) -> std::result::Result<Piece, String> {
    let mut reader = ProtobufReader::new(data);
    let mut piece = Piece {
        text: String::new(),
        score: 0.0,
        kind: PieceType::Normal,
    };
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        match (field, wire) {
            (PIECE_TEXT, WIRE_LEN) => piece.text = reader.read_string()?,
            (PIECE_SCORE, WIRE_FIXED32) => piece.score = reader.read_f32()?,
            (PIECE_TYPE, WIRE_VARINT) => piece.kind = PieceType::from_wire(reader.read_varint()?),
            _ => reader.skip(wire)?,
        }
    }
    Ok(piece)
}

fn parse_trainer(data: &[u8], ids: &mut TrainerIds) -> std::result::Result<(), String> {
    let mut reader = ProtobufReader::new(data);
    while reader.has_more() {
        let (field, wire) = reader.read_tag()?;
        let slot = match field {
            TRAINER_UNK_ID => Some(&mut ids.unk),
            TRAINER_BOS_ID => Some(&mut ids.bos),
            TRAINER_EOS_ID => Some(&mut ids.eos),
            TRAINER_PAD_ID => Some(&mut ids.pad),
            _ => None,
        };
        match slot {
            Some(slot) if wire == WIRE_VARINT => {
                // int32 is sign-extended to 64 bits on the wire
                *slot = reader.read_varint()? as i64 as i32;
            }
            _ => reader.skip(wire)?,
        }
    }
    Ok(())
}

/// Minimal protobuf wire-format reader
struct ProtobufReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ProtobufReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    fn read_tag(&mut self) -> std::result::Result<(u32, u32), String> {
        let tag = self.read_varint()?;
        Ok(((tag >> 3) as u32, (tag & 0x7) as u32))
    }

    fn read_varint(&mut self) -> std::result::Result<u64, String> {
        let mut value = 0u64;
        let mut shift = 0;
        loop {
            let byte = *self
                .data
                .get(self.pos)
                .ok_or("unexpected end of data in varint")?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err("varint overflow".into());
            }
        }
    }

    fn take(&mut self, len: usize) -> std::result::Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                format!(
                    "field of {len} bytes at offset {} extends past {} bytes",
                    self.pos,
                    self.data.len()
                )
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_bytes(&mut self) -> std::result::Result<&'a [u8], String> {
        let len = usize::try_from(self.read_varint()?).map_err(|e| e.to_string())?;
        self.take(len)
    }

    fn read_string(&mut self) -> std::result::Result<String, String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "invalid UTF-8 in piece text".to_string())
    }

    fn read_f32(&mut self) -> std::result::Result<f32, String> {
        let bytes = self.take(4)?;
        Ok(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn skip(&mut self, wire: u32) -> std::result::Result<(), String> {
        match wire {
            WIRE_VARINT => self.read_varint().map(drop),
            WIRE_FIXED64 => self.take(8).map(drop),
            WIRE_LEN => self.read_bytes().map(drop),
            WIRE_FIXED32 => self.take(4).map(drop),
            other => Err(format!("unsupported wire type {other}")),
        }
    }
}
