//! Per-page output values and the ordered slot container.

use serde::{Deserialize, Serialize};

use crate::error::{AfppError, Result};

/// Content extracted from one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PageContent {
    /// Text runs joined with single spaces. May be empty.
    Text(String),
    /// Encoded raster of the page.
    Image(Vec<u8>),
}

impl PageContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PageContent::Text(text) => Some(text),
            PageContent::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&[u8]> {
        match self {
            PageContent::Image(bytes) => Some(bytes),
            PageContent::Text(_) => None,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, PageContent::Image(_))
    }
}

/// Fixed-size container holding one value per page, in page order.
#[derive(Debug)]
pub struct PageSlots<T> {
    slots: Vec<Option<T>>,
}

impl<T> PageSlots<T> {
    /// Allocate `page_count` empty slots.
    pub fn new(page_count: u32) -> Self {
        Self {
            slots: (0..page_count).map(|_| None).collect(),
        }
    }

    /// Store the value for the 1-based `page`. Each slot is written once.
    pub fn fill(&mut self, page: u32, value: T) -> Result<()> {
        let slot = page
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index as usize))
            .ok_or_else(|| slot_error(page, "out of range"))?;
        if slot.is_some() {
            return Err(slot_error(page, "filled twice"));
        }
        *slot = Some(value);
        Ok(())
    }

    /// Yield the values in page order. Every slot must be filled.
    pub fn finish(self) -> Result<Vec<T>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.ok_or_else(|| slot_error(index as u32 + 1, "never filled")))
            .collect()
    }
}

fn slot_error(page: u32, reason: &str) -> AfppError {
    AfppError::Engine {
        name: "InvalidPageException".to_string(),
        message: format!("page {}: output slot {}", page, reason),
    }
}
