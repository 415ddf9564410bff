//! Growable column buffer whose capacity is charged to an allocator.
//!
//! The reservation covers `capacity * slot_size` plus the heap bytes of any
//! string values. Growth charges first and only then touches the vector, so a
//! rejected charge leaves the buffer as it was.

use tabflow_core::schema::ColumnType;
use tabflow_core::types::Value;
use tabflow_mem::{Allocator, Reservation};

use crate::column::ColumnData;

const MIN_SLOTS: usize = 8;

#[derive(Debug)]
pub struct Buffer {
    data: ColumnData,
    reservation: Reservation,
    slots: usize,
    heap_bytes: usize,
}

impl Buffer {
    pub fn new(ty: ColumnType, alloc: &Allocator) -> tabflow_mem::Result<Self> {
        Ok(Self {
            data: ColumnData::new(ty),
            reservation: alloc.reserve(0, "column")?,
            slots: 0,
            heap_bytes: 0,
        })
    }

    pub fn column_type(&self) -> ColumnType {
        self.data.column_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes currently charged for this buffer.
    pub fn accounted_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    /// Make room for `additional` more values.
    pub fn reserve(&mut self, additional: usize) -> tabflow_mem::Result<()> {
        let needed = self.len().saturating_add(additional);
        if needed <= self.slots {
            return Ok(());
        }
        self.grow_to(needed)
    }

    fn grow_to(&mut self, slots: usize) -> tabflow_mem::Result<()> {
        let slot = ColumnData::slot_size(self.column_type());
        let bytes = slots.saturating_mul(slot).saturating_add(self.heap_bytes);
        self.reservation.try_resize(bytes)?;
        self.data.reserve_exact(slots - self.len());
        self.slots = slots;
        Ok(())
    }

    /// Append one value. `Err(Ok(value))` hands back a value of the wrong
    /// type; `Err(Err(e))` is a rejected allocation.
    pub(crate) fn push(
        &mut self,
        value: Value,
    ) -> std::result::Result<(), std::result::Result<Value, tabflow_mem::Error>> {
        if let Some(ty) = value.column_type() {
            if ty != self.column_type() {
                return Err(Ok(value));
            }
        }
        if self.len() == self.slots {
            let next = (self.slots * 2).max(MIN_SLOTS);
            self.grow_to(next).map_err(Err)?;
        }
        if let Value::Str(s) = &value {
            self.reservation.grow(s.len()).map_err(Err)?;
            self.heap_bytes += s.len();
        }
        self.data.push(value).map_err(Ok)
    }

    /// Seal into immutable column data plus the reservation that keeps it
    /// accounted.
    pub(crate) fn into_parts(self) -> (ColumnData, Reservation) {
        (self.data, self.reservation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_charged_before_it_happens() {
        let alloc = Allocator::with_limit(ColumnData::slot_size(ColumnType::Int) * MIN_SLOTS);
        let mut buf = Buffer::new(ColumnType::Int, &alloc).unwrap();
        for i in 0..MIN_SLOTS as i64 {
            buf.push(Value::Int(i)).unwrap();
        }
        assert_eq!(alloc.used(), buf.accounted_bytes());

        let err = buf.push(Value::Int(99)).unwrap_err().unwrap_err();
        assert!(matches!(err, tabflow_mem::Error::ResourceExhausted { .. }));
        assert_eq!(buf.len(), MIN_SLOTS);

        drop(buf);
        assert_eq!(alloc.used(), 0);
    }

    #[test]
    fn string_payload_is_accounted() {
        let alloc = Allocator::unlimited();
        let mut buf = Buffer::new(ColumnType::String, &alloc).unwrap();
        buf.push(Value::Str("abcdef".into())).unwrap();
        let slots = MIN_SLOTS * ColumnData::slot_size(ColumnType::String);
        assert_eq!(alloc.used(), slots + 6);
    }
}
