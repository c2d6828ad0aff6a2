//! Indexing and slicing.
//!
//! Strings, lists, and bytes accept single-integer and two-integer
//! (slice) indexing; negative indices count from the end; slice bounds
//! are clamped and reversed bounds yield an empty result. Dicts accept
//! any hashable key and raise on a missing one. `SetIndex` on strings is
//! an error.

use crate::heap::{BytesObj, ListObj, ObjData};
use crate::value::Value;

use super::{Signal, Vm};

/// Resolves a possibly negative index against `len`; `None` when out of
/// range.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// Resolves slice bounds: negatives count from the end, then both clamp
/// into `[0, len]`. A reversed range collapses to empty.
fn resolve_slice(lower: i64, upper: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let lo = if lower < 0 { lower + len } else { lower }.clamp(0, len);
    let hi = if upper < 0 { upper + len } else { upper }.clamp(0, len);
    if lo >= hi {
        (0, 0)
    } else {
        (lo as usize, hi as usize)
    }
}

impl Vm<'_> {
    /// `GetIndex will_assign`: with the flag set, the receiver and index
    /// stay on the stack beneath the result for a following `SetIndex`.
    pub(crate) fn get_index(&mut self, will_assign: bool) -> Result<(), Signal> {
        let receiver = self.peek(1);
        let index = self.peek(0);

        let Some(id) = receiver.as_ref_id() else {
            return Err(self.not_indexable(receiver));
        };

        let value = match self.heap.get(id) {
            ObjData::Str(s) => {
                let Some(i) = index.as_int() else {
                    return Err(self.type_error("strings are numerically indexed").into());
                };
                let Some(at) = resolve_index(i, s.char_len) else {
                    return Err(self.type_error(&format!("string index {i} out of range")).into());
                };
                let ch: String = s.chars.chars().skip(at).take(1).collect();
                self.intern_string(ch)
            }
            ObjData::List(l) => {
                let Some(i) = index.as_int() else {
                    return Err(self.type_error("lists are numerically indexed").into());
                };
                let Some(at) = resolve_index(i, l.items.len()) else {
                    return Err(self.type_error(&format!("list index {i} out of range")).into());
                };
                l.items[at]
            }
            ObjData::Bytes(b) => {
                let Some(i) = index.as_int() else {
                    return Err(self.type_error("bytes are numerically indexed").into());
                };
                let Some(at) = resolve_index(i, b.bytes.len()) else {
                    return Err(self.type_error(&format!("bytes index {i} out of range")).into());
                };
                Value::Number(f64::from(b.bytes[at]))
            }
            ObjData::Dict(d) => match d.items.get(&index).copied() {
                Some(value) => value,
                None => {
                    let shown = self.heap.value_to_repr(index);
                    return Err(self.type_error(&format!("invalid index {shown}")).into());
                }
            },
            _ => return Err(self.not_indexable(receiver)),
        };

        if will_assign {
            self.push(value);
        } else {
            self.pop_n(2);
            self.push(value);
        }
        Ok(())
    }

    /// `GetRangedIndex`: `[receiver, lower, upper]` → slice.
    pub(crate) fn get_ranged_index(&mut self) -> Result<(), Signal> {
        let receiver = self.peek(2);
        let (Some(lower), Some(upper)) = (self.peek(1).as_int(), self.peek(0).as_int()) else {
            return Err(self.type_error("slice indices must be numbers").into());
        };

        let Some(id) = receiver.as_ref_id() else {
            return Err(self.not_indexable(receiver));
        };

        let value = match self.heap.get(id) {
            ObjData::Str(s) => {
                let (lo, hi) = resolve_slice(lower, upper, s.char_len);
                let text: String = s.chars.chars().skip(lo).take(hi - lo).collect();
                self.intern_string(text)
            }
            ObjData::List(l) => {
                let (lo, hi) = resolve_slice(lower, upper, l.items.len());
                let items = l.items[lo..hi].to_vec();
                self.gc_checkpoint();
                Value::Ref(self.heap.allocate(ObjData::List(ListObj { items })))
            }
            ObjData::Bytes(b) => {
                let (lo, hi) = resolve_slice(lower, upper, b.bytes.len());
                let bytes = b.bytes[lo..hi].to_vec();
                self.gc_checkpoint();
                Value::Ref(self.heap.allocate(ObjData::Bytes(BytesObj { bytes })))
            }
            _ => return Err(self.not_indexable(receiver)),
        };

        self.pop_n(3);
        self.push(value);
        Ok(())
    }

    /// `SetIndex`: `[receiver, index, value]` → stores, leaving the value
    /// on the stack for chained assignment. Validation runs against an
    /// immutable borrow so errors can be built; mutation follows.
    pub(crate) fn set_index(&mut self) -> Result<(), Signal> {
        let receiver = self.peek(2);
        let index = self.peek(1);
        let value = self.peek(0);

        let Some(id) = receiver.as_ref_id() else {
            return Err(self.not_indexable(receiver));
        };

        enum Store {
            List(usize),
            Bytes(usize, u8),
            Dict,
        }

        let store = match self.heap.get(id) {
            ObjData::List(l) => {
                let Some(i) = index.as_int() else {
                    return Err(self.type_error("lists are numerically indexed").into());
                };
                let Some(at) = resolve_index(i, l.items.len()) else {
                    return Err(self.type_error(&format!("list index {i} out of range")).into());
                };
                Store::List(at)
            }
            ObjData::Bytes(b) => {
                let Some(i) = index.as_int() else {
                    return Err(self.type_error("bytes are numerically indexed").into());
                };
                let byte = match value.as_int() {
                    Some(v) if (0..=255).contains(&v) => v as u8,
                    _ => {
                        return Err(self
                            .type_error("invalid byte. bytes are numbers between 0 and 255.")
                            .into());
                    }
                };
                let Some(at) = resolve_index(i, b.bytes.len()) else {
                    return Err(self.type_error(&format!("bytes index {i} out of range")).into());
                };
                Store::Bytes(at, byte)
            }
            ObjData::Dict(_) => Store::Dict,
            ObjData::Str(_) => {
                return Err(self.type_error("strings do not support object assignment").into());
            }
            _ => return Err(self.not_indexable(receiver)),
        };

        match (store, self.heap.get_mut(id)) {
            (Store::List(at), ObjData::List(l)) => l.items[at] = value,
            (Store::Bytes(at, byte), ObjData::Bytes(b)) => b.bytes[at] = byte,
            (Store::Dict, ObjData::Dict(d)) => {
                d.items.insert(index, value);
            }
            _ => unreachable!("receiver kind cannot change between phases"),
        }

        self.pop_n(3);
        self.push(value);
        Ok(())
    }

    fn not_indexable(&self, receiver: Value) -> Signal {
        self.type_error(&format!(
            "type of {} does not support indexing",
            self.heap.type_name(receiver)
        ))
        .into()
    }
}
