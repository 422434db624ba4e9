//! A growable vector of bits, used to mark which fields of a structure changed.
//!
//! Bit `n` corresponds to the field at pre-order offset `n` of a structure, and
//! bit 0 (the structure itself) conventionally means "everything changed". The
//! layout and wire encoding follow the pvAccess `BitSet`: 64-bit words, with
//! the high-water mark of words actually in use tracked separately from the
//! allocated capacity.

use std::{
    fmt,
    io::{self, Write},
    ops::{BitAndAssign, BitOrAssign, BitXorAssign},
};

use nom::{
    IResult, Parser,
    bytes::complete::take,
    error::Error,
    multi::count,
    number::{Endianness, complete::u64 as parse_u64},
};

use crate::{
    codec::{PVSerialize, parse_size, u64_bytes, write_size},
    introspect::{Field, Structure},
};

const ADDRESS_BITS_PER_WORD: usize = 6;
const BITS_PER_WORD: usize = 1 << ADDRESS_BITS_PER_WORD;
const BIT_INDEX_MASK: usize = BITS_PER_WORD - 1;
const WORD_MASK: u64 = u64::MAX;

#[inline]
const fn word_index(bit_index: usize) -> usize {
    bit_index >> ADDRESS_BITS_PER_WORD
}

#[inline]
const fn bit_mask(bit_index: usize) -> u64 {
    1u64 << (bit_index & BIT_INDEX_MASK)
}

/// Count trailing zero bits of a word, Hacker's Delight style.
///
/// Returns 64 for a zero word.
pub const fn number_of_trailing_zeros(word: u64) -> u32 {
    if word == 0 {
        return 64;
    }
    let mut n: u32 = 63;
    let mut x: u32;
    let mut y: u32 = word as u32;
    if y != 0 {
        n -= 32;
        x = y;
    } else {
        x = (word >> 32) as u32;
    }
    y = x << 16;
    if y != 0 {
        n -= 16;
        x = y;
    }
    y = x << 8;
    if y != 0 {
        n -= 8;
        x = y;
    }
    y = x << 4;
    if y != 0 {
        n -= 4;
        x = y;
    }
    y = x << 2;
    if y != 0 {
        n -= 2;
        x = y;
    }
    n - ((x << 1) >> 31)
}

/// Population count of a word, Hacker's Delight style
pub const fn bit_count(word: u64) -> u32 {
    let mut i = word;
    i = i.wrapping_sub((i >> 1) & 0x5555_5555_5555_5555);
    i = (i & 0x3333_3333_3333_3333) + ((i >> 2) & 0x3333_3333_3333_3333);
    i = (i.wrapping_add(i >> 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    i = i.wrapping_add(i >> 8);
    i = i.wrapping_add(i >> 16);
    i = i.wrapping_add(i >> 32);
    (i & 0x7f) as u32
}

#[derive(Clone, Debug, Default)]
pub struct BitSet {
    words: Vec<u64>,
    /// Number of words in the logical size; every word at or past this is zero
    words_in_use: usize,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet::default()
    }

    /// Create a bitset with room for at least `nbits` bits without growing
    pub fn with_capacity(nbits: usize) -> Self {
        BitSet {
            words: vec![0; word_index(nbits.saturating_sub(1)) + 1],
            words_in_use: 0,
        }
    }

    fn recalculate_words_in_use(&mut self) {
        let mut i = self.words_in_use;
        while i > 0 && self.words[i - 1] == 0 {
            i -= 1;
        }
        self.words_in_use = i;
    }

    fn ensure_capacity(&mut self, words_required: usize) {
        if self.words.len() < words_required {
            let request = words_required.max(2 * self.words.len());
            self.words.resize(request, 0);
        }
    }

    /// Grow the logical size so that word `word_index` is in use
    fn expand_to(&mut self, word_index: usize) {
        let words_required = word_index + 1;
        if self.words_in_use < words_required {
            self.ensure_capacity(words_required);
            self.words_in_use = words_required;
        }
    }

    pub fn set(&mut self, bit_index: usize) {
        let index = word_index(bit_index);
        self.expand_to(index);
        self.words[index] |= bit_mask(bit_index);
    }

    pub fn set_to(&mut self, bit_index: usize, value: bool) {
        if value {
            self.set(bit_index);
        } else {
            self.clear(bit_index);
        }
    }

    pub fn clear(&mut self, bit_index: usize) {
        let index = word_index(bit_index);
        if index >= self.words_in_use {
            return;
        }
        self.words[index] &= !bit_mask(bit_index);
        self.recalculate_words_in_use();
    }

    pub fn flip(&mut self, bit_index: usize) {
        let index = word_index(bit_index);
        self.expand_to(index);
        self.words[index] ^= bit_mask(bit_index);
        self.recalculate_words_in_use();
    }

    /// Read a bit. Anything past the current size reads as clear.
    pub fn get(&self, bit_index: usize) -> bool {
        let index = word_index(bit_index);
        index < self.words_in_use && (self.words[index] & bit_mask(bit_index)) != 0
    }

    /// Clear every bit, keeping the allocation
    pub fn clear_all(&mut self) {
        self.words[..self.words_in_use].fill(0);
        self.words_in_use = 0;
    }

    /// Index of the first set bit at or after `from`
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        let mut index = word_index(from);
        if index >= self.words_in_use {
            return None;
        }
        let mut word = self.words[index] & (WORD_MASK << (from & BIT_INDEX_MASK));
        loop {
            if word != 0 {
                return Some(
                    index * BITS_PER_WORD + number_of_trailing_zeros(word) as usize,
                );
            }
            index += 1;
            if index == self.words_in_use {
                return None;
            }
            word = self.words[index];
        }
    }

    /// Index of the first clear bit at or after `from`.
    ///
    /// There is always one, since the set is unbounded above.
    pub fn next_clear_bit(&self, from: usize) -> usize {
        let mut index = word_index(from);
        if index >= self.words_in_use {
            return from;
        }
        let mut word = !self.words[index] & (WORD_MASK << (from & BIT_INDEX_MASK));
        loop {
            if word != 0 {
                return index * BITS_PER_WORD + number_of_trailing_zeros(word) as usize;
            }
            index += 1;
            if index == self.words_in_use {
                return self.words_in_use * BITS_PER_WORD;
            }
            word = !self.words[index];
        }
    }

    /// Is any bit in `[from, to)` set
    pub fn any_in_range(&self, from: usize, to: usize) -> bool {
        self.next_set_bit(from).is_some_and(|next| next < to)
    }

    /// Number of set bits
    pub fn cardinality(&self) -> usize {
        self.words[..self.words_in_use]
            .iter()
            .map(|&w| bit_count(w) as usize)
            .sum()
    }

    /// Index of the highest set bit plus one
    pub fn length(&self) -> usize {
        if self.words_in_use == 0 {
            return 0;
        }
        let top = self.words[self.words_in_use - 1];
        BITS_PER_WORD * (self.words_in_use - 1) + (BITS_PER_WORD - top.leading_zeros() as usize)
    }

    /// Number of bits currently allocated
    pub fn size(&self) -> usize {
        self.words.len() * BITS_PER_WORD
    }

    pub fn is_empty(&self) -> bool {
        self.words_in_use == 0
    }

    /// Do this set and `other` have any bit in common
    pub fn intersects(&self, other: &BitSet) -> bool {
        let n = self.words_in_use.min(other.words_in_use);
        (0..n).any(|i| self.words[i] & other.words[i] != 0)
    }

    /// Is every set bit of this set also set in `other`
    pub fn is_subset(&self, other: &BitSet) -> bool {
        self.words[..self.words_in_use]
            .iter()
            .enumerate()
            .all(|(i, &w)| w & !other.words.get(i).copied().unwrap_or(0) == 0)
    }

    /// `self |= (a & b)`
    pub fn or_and(&mut self, a: &BitSet, b: &BitSet) {
        let in_common = a.words_in_use.min(b.words_in_use);
        if in_common == 0 {
            return;
        }
        self.expand_to(in_common - 1);
        for i in 0..in_common {
            self.words[i] |= a.words[i] & b.words[i];
        }
        self.recalculate_words_in_use();
    }

    /// Clear every bit that is set in `other`
    pub fn and_not(&mut self, other: &BitSet) {
        let n = self.words_in_use.min(other.words_in_use);
        for i in 0..n {
            self.words[i] &= !other.words[i];
        }
        self.recalculate_words_in_use();
    }

    pub fn swap(&mut self, other: &mut BitSet) {
        std::mem::swap(self, other);
    }

    /// Iterate the indices of set bits, in ascending order
    pub fn iter(&self) -> SetBits<'_> {
        SetBits {
            bits: self,
            next: self.next_set_bit(0),
        }
    }

    /// Collapse fully-set subtrees of `structure` into their parent bit.
    ///
    /// Wherever every field of a sub-structure is marked, the individual bits
    /// are cleared and the sub-structure's own bit is set instead. A set
    /// structure bit also absorbs any bits below it. Returns whether any bit at
    /// all is set for the structure.
    pub fn compress(&mut self, structure: &Structure) -> bool {
        self.compress_structure(structure, 0)
    }

    fn compress_structure(&mut self, structure: &Structure, offset: usize) -> bool {
        let nbits = structure.number_fields();
        if nbits == 1 {
            return self.get(offset);
        }
        if !self.any_in_range(offset, offset + nbits) {
            return false;
        }
        if self.get(offset) {
            for i in offset + 1..offset + nbits {
                self.clear(i);
            }
            return true;
        }

        let mut at_least_one = false;
        let mut all_set = true;
        let mut child_offset = offset + 1;
        for field in structure.fields() {
            let marked = match field {
                Field::Structure(sub) => {
                    self.compress_structure(sub, child_offset) && self.get(child_offset)
                }
                _ => self.get(child_offset),
            };
            at_least_one |= self.any_in_range(child_offset, child_offset + field.number_fields());
            all_set &= marked;
            child_offset += field.number_fields();
        }
        if all_set {
            for i in offset + 1..offset + nbits {
                self.clear(i);
            }
            self.set(offset);
        }
        at_least_one
    }
}

pub struct SetBits<'a> {
    bits: &'a BitSet,
    next: Option<usize>,
}

impl Iterator for SetBits<'_> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        let current = self.next?;
        self.next = self.bits.next_set_bit(current + 1);
        Some(current)
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut bits = BitSet::new();
        for index in iter {
            bits.set(index);
        }
        bits
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.words_in_use == other.words_in_use
            && self.words[..self.words_in_use] == other.words[..other.words_in_use]
    }
}
impl Eq for BitSet {}

impl BitAndAssign<&BitSet> for BitSet {
    fn bitand_assign(&mut self, rhs: &BitSet) {
        let in_common = self.words_in_use.min(rhs.words_in_use);
        self.words[in_common..self.words_in_use].fill(0);
        self.words_in_use = in_common;
        for i in 0..in_common {
            self.words[i] &= rhs.words[i];
        }
        self.recalculate_words_in_use();
    }
}

impl BitOrAssign<&BitSet> for BitSet {
    fn bitor_assign(&mut self, rhs: &BitSet) {
        if rhs.words_in_use == 0 {
            return;
        }
        self.expand_to(rhs.words_in_use - 1);
        for i in 0..rhs.words_in_use {
            self.words[i] |= rhs.words[i];
        }
    }
}

impl BitXorAssign<&BitSet> for BitSet {
    fn bitxor_assign(&mut self, rhs: &BitSet) {
        if rhs.words_in_use == 0 {
            return;
        }
        self.expand_to(rhs.words_in_use - 1);
        for i in 0..rhs.words_in_use {
            self.words[i] ^= rhs.words[i];
        }
        self.recalculate_words_in_use();
    }
}

impl fmt::Display for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, index) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{index}")?;
        }
        write!(f, "}}")
    }
}

impl PVSerialize for BitSet {
    /// Whole words go in `endian` order. A partial top word sends only its
    /// significant bytes, least significant first.
    fn write<W: Write>(&self, writer: &mut W, endian: Endianness) -> io::Result<()> {
        let n = self.words_in_use;
        if n == 0 {
            return write_size(Some(0), writer, endian);
        }
        let top = self.words[n - 1];
        let top_bytes = (BITS_PER_WORD - top.leading_zeros() as usize).div_ceil(8);
        let len = 8 * (n - 1) + top_bytes;
        write_size(Some(len), writer, endian)?;
        let full = len / 8;
        for word in &self.words[..full] {
            writer.write_all(&u64_bytes(*word, endian))?;
        }
        if full < n {
            writer.write_all(&top.to_le_bytes()[..len % 8])?;
        }
        Ok(())
    }

    fn parse(input: &[u8], endian: Endianness) -> IResult<&[u8], BitSet> {
        let (input, bytes) = parse_size(input, endian)?;
        let bytes = bytes.unwrap_or(0);
        let (input, mut words) =
            count(parse_u64::<&[u8], Error<&[u8]>>(endian), bytes / 8).parse(input)?;
        let (input, tail) = take::<usize, &[u8], Error<&[u8]>>(bytes % 8).parse(input)?;
        if !tail.is_empty() {
            words.push(
                tail.iter()
                    .enumerate()
                    .fold(0u64, |word, (j, &b)| word | (b as u64) << (8 * j)),
            );
        }
        let mut bits = BitSet {
            words_in_use: words.len(),
            words,
        };
        bits.recalculate_words_in_use();
        Ok((input, bits))
    }
}
