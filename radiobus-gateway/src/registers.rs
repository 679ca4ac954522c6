//! Mirrored holding/input register banks.

use parking_lot::Mutex;

use crate::codec::{self, Word};

/// Register bank selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// Read with function code 3, writable with 6 and 16.
    Holding,
    /// Read with function code 4.
    Input,
}

/// Errors from register access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("registers {address}..+{count} are outside {lowest}..={highest}")]
    OutOfRange {
        address: u16,
        count: usize,
        lowest: u16,
        highest: u16,
    },
}

#[derive(Debug)]
struct Banks {
    holding: Vec<Word>,
    input: Vec<Word>,
}

/// Word-addressable register store covering the closed interval
/// `[lowest, highest]`.
///
/// Both banks live behind one lock so a sensor write updates them together
/// and a reader never sees half of a float.
#[derive(Debug)]
pub struct RegisterStore {
    lowest: u16,
    highest: u16,
    banks: Mutex<Banks>,
}

impl RegisterStore {
    /// Create zeroed banks. `highest` must not be below `lowest`.
    pub fn new(lowest: u16, highest: u16) -> Self {
        let len = usize::from(highest.saturating_sub(lowest)) + 1;
        Self {
            lowest,
            highest,
            banks: Mutex::new(Banks {
                holding: vec![0; len],
                input: vec![0; len],
            }),
        }
    }

    /// Lowest served address.
    pub fn lowest(&self) -> u16 {
        self.lowest
    }

    /// Highest served address.
    pub fn highest(&self) -> u16 {
        self.highest
    }

    fn offset(&self, address: u16, count: usize) -> Result<usize, RegisterError> {
        let out_of_range = || RegisterError::OutOfRange {
            address,
            count,
            lowest: self.lowest,
            highest: self.highest,
        };

        if address < self.lowest {
            return Err(out_of_range());
        }
        let start = usize::from(address - self.lowest);
        let len = usize::from(self.highest - self.lowest) + 1;
        if start + count > len {
            return Err(out_of_range());
        }
        Ok(start)
    }

    /// Encode `values` and write them into both banks at `start_address`.
    ///
    /// The encoded words are truncated to `span` registers, the size of the
    /// device's block. Returns the number of registers written.
    pub fn write_device(
        &self,
        start_address: u16,
        span: u32,
        values: &[f64],
    ) -> Result<usize, RegisterError> {
        let mut words = codec::encode_values(values);
        words.truncate(span as usize);

        let offset = self.offset(start_address, words.len())?;
        let end = offset + words.len();

        let mut banks = self.banks.lock();
        banks.holding[offset..end].copy_from_slice(&words);
        banks.input[offset..end].copy_from_slice(&words);

        Ok(words.len())
    }

    /// Read `count` registers from a bank.
    pub fn read(&self, bank: Bank, address: u16, count: u16) -> Result<Vec<Word>, RegisterError> {
        let offset = self.offset(address, usize::from(count))?;
        let end = offset + usize::from(count);

        let banks = self.banks.lock();
        let source = match bank {
            Bank::Holding => &banks.holding,
            Bank::Input => &banks.input,
        };
        Ok(source[offset..end].to_vec())
    }

    /// Write raw words into the holding bank (master-initiated writes).
    pub fn write_holding(&self, address: u16, words: &[Word]) -> Result<(), RegisterError> {
        let offset = self.offset(address, words.len())?;
        let mut banks = self.banks.lock();
        banks.holding[offset..offset + words.len()].copy_from_slice(words);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_device_mirrors_banks() {
        let store = RegisterStore::new(30000, 39999);

        let written = store.write_device(39000, 50, &[19.5, -3.25]).unwrap();
        assert_eq!(written, 4);

        let holding = store.read(Bank::Holding, 39000, 4).unwrap();
        let input = store.read(Bank::Input, 39000, 4).unwrap();
        assert_eq!(holding, input);
        assert_eq!(codec::decode([holding[0], holding[1]]), 19.5);
        assert_eq!(codec::decode([holding[2], holding[3]]), -3.25);
    }

    #[test]
    fn test_write_device_truncates_to_span() {
        let store = RegisterStore::new(0, 99);

        // Three values need six registers but the block only has five.
        let written = store.write_device(10, 5, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(written, 5);

        let words = store.read(Bank::Input, 10, 6).unwrap();
        assert_eq!(codec::decode([words[2], words[3]]), 2.0);
        assert_eq!(words[5], 0);
    }

    #[test]
    fn test_write_device_with_whole_space_block() {
        let store = RegisterStore::new(0, u16::MAX);

        let written = store.write_device(0, 65536, &[1.0, 2.0]).unwrap();
        assert_eq!(written, 4);
        let words = store.read(Bank::Holding, 2, 2).unwrap();
        assert_eq!(codec::decode([words[0], words[1]]), 2.0);
    }

    #[test]
    fn test_out_of_range() {
        let store = RegisterStore::new(30000, 30009);

        assert!(store.read(Bank::Holding, 29999, 1).is_err());
        assert!(store.read(Bank::Holding, 30009, 2).is_err());
        assert!(store.read(Bank::Holding, 30009, 1).is_ok());
        assert!(store.write_device(30008, 50, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_write_holding_leaves_input_untouched() {
        let store = RegisterStore::new(0, 9);
        store.write_holding(2, &[7, 8]).unwrap();

        assert_eq!(store.read(Bank::Holding, 2, 2).unwrap(), vec![7, 8]);
        assert_eq!(store.read(Bank::Input, 2, 2).unwrap(), vec![0, 0]);
    }
}
