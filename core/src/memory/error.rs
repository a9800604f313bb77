use thiserror::Error;

use crate::field::Felt;
use crate::relocatable::{Relocatable, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory at {addr} is write-once: cell holds {old}, refusing {new}")]
    InconsistentMemory {
        addr: Relocatable,
        old: Value,
        new: Value,
    },
    #[error("expected a field element at {0}, found an address")]
    ExpectedFelt(Relocatable),
    #[error("expected an address at {0}, found a field element")]
    ExpectedRelocatable(Relocatable),
    #[error("nothing written at {0}")]
    UnknownMemoryCell(Relocatable),
    #[error("offset {offset} does not fit the offset width of address {base}")]
    OffsetOverflow { base: Relocatable, offset: Felt },
    #[error("offset underflow: {base} - {offset}")]
    OffsetUnderflow { base: Relocatable, offset: usize },
    #[error("cannot add two addresses: {0} + {1}")]
    AddressToAddress(Relocatable, Relocatable),
    #[error("cannot subtract {1} from {0}")]
    IllegalSubtraction(Value, Value),
    #[error("cannot subtract {1} from {0}: segments differ")]
    DifferentSegments(Relocatable, Relocatable),
    #[error("temporary segment {0} was used but never assigned a destination")]
    UnresolvedTemporary(isize),
    #[error("relocation source {0} is not the base of a temporary segment")]
    InvalidRelocationSource(Relocatable),
    #[error("temporary segment {0} already has a relocation destination")]
    DuplicateRelocationRule(isize),
    #[error("range check: value at {0} is not a field element")]
    RangeCheckNotAFelt(Relocatable),
    #[error("range check: {0} is out of bounds [0, 2^128)")]
    RangeCheckOutOfBounds(Felt),
}
