//! Masked register fields. A field names a byte offset inside a window, the
//! access width of the containing register and the mask of the bits it owns.
//! Updates are always read-modify-write of the owned bits only: `current | mask`
//! to set, `current & !mask` to clear.

use std::{fmt, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::soc::device::{Device, DeviceResult};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldWidth {
    U8,
    #[default]
    U32,
}

impl FieldWidth {
    pub fn bytes(self) -> usize {
        match self {
            FieldWidth::U8 => 1,
            FieldWidth::U32 => 4,
        }
    }

    pub fn max_mask(self) -> u32 {
        match self {
            FieldWidth::U8 => 0xFF,
            FieldWidth::U32 => u32::MAX,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("field '{field}' has an empty mask")]
    EmptyMask { field: String },
    #[error("field '{field}' mask 0x{mask:X} does not fit a {width:?} register")]
    MaskTooWide {
        field: String,
        mask: u32,
        width: FieldWidth,
    },
    #[error("field '{field}' at offset 0x{offset:X} lies outside a {window_len} byte window")]
    OutsideWindow {
        field: String,
        offset: usize,
        window_len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterField {
    pub name: String,
    pub offset: usize,
    pub mask: u32,
    pub width: FieldWidth,
}

impl RegisterField {
    pub fn new(name: impl Into<String>, offset: usize, mask: u32, width: FieldWidth) -> Self {
        Self {
            name: name.into(),
            offset,
            mask,
            width,
        }
    }

    pub fn validate(&self, window_len: usize) -> Result<(), FieldError> {
        if self.mask == 0 {
            return Err(FieldError::EmptyMask {
                field: self.name.clone(),
            });
        }
        if self.mask & !self.width.max_mask() != 0 {
            return Err(FieldError::MaskTooWide {
                field: self.name.clone(),
                mask: self.mask,
                width: self.width,
            });
        }
        match self.offset.checked_add(self.width.bytes()) {
            Some(end) if end <= window_len => Ok(()),
            _ => Err(FieldError::OutsideWindow {
                field: self.name.clone(),
                offset: self.offset,
                window_len,
            }),
        }
    }

    /// True when both fields claim at least one common bit of the same byte.
    /// Bytes are laid out little endian inside a word register.
    pub fn overlaps(&self, other: &RegisterField) -> bool {
        self.byte_masks().any(|(addr, mask)| {
            other
                .byte_masks()
                .any(|(other_addr, other_mask)| addr == other_addr && mask & other_mask != 0)
        })
    }

    fn byte_masks(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        (0..self.width.bytes()).map(move |idx| (self.offset + idx, (self.mask >> (idx * 8)) as u8))
    }
}

/// A field bound to the window it lives in.
#[derive(Clone)]
pub struct BoundField {
    label: String,
    window: Arc<dyn Device>,
    field: RegisterField,
}

impl BoundField {
    pub fn new(label: impl Into<String>, window: Arc<dyn Device>, field: RegisterField) -> Self {
        Self {
            label: label.into(),
            window,
            field,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn field(&self) -> &RegisterField {
        &self.field
    }

    pub fn window(&self) -> &Arc<dyn Device> {
        &self.window
    }

    /// Raw value of the whole containing register.
    pub fn read_register(&self) -> DeviceResult<u32> {
        match self.field.width {
            FieldWidth::U8 => self.window.read_u8(self.field.offset).map(u32::from),
            FieldWidth::U32 => self.window.read_u32(self.field.offset),
        }
    }

    fn write_register(&self, value: u32) -> DeviceResult<()> {
        match self.field.width {
            FieldWidth::U8 => self.window.write_u8(self.field.offset, value as u8),
            FieldWidth::U32 => self.window.write_u32(self.field.offset, value),
        }
    }

    /// Owned bits only, still in register position.
    pub fn get(&self) -> DeviceResult<u32> {
        Ok(self.read_register()? & self.field.mask)
    }

    /// Active-low inputs read as zero while asserted.
    pub fn is_low(&self) -> DeviceResult<bool> {
        Ok(self.get()? == 0)
    }

    pub fn set(&self) -> DeviceResult<()> {
        let current = self.read_register()?;
        self.write_register(current | self.field.mask)
    }

    pub fn clear(&self) -> DeviceResult<()> {
        let current = self.read_register()?;
        self.write_register(current & !self.field.mask)
    }

    pub fn drive(&self, on: bool) -> DeviceResult<()> {
        if on { self.set() } else { self.clear() }
    }
}

impl fmt::Debug for BoundField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundField")
            .field("label", &self.label)
            .field("window", &self.window.name())
            .field("field", &self.field)
            .finish()
    }
}
