//! Request splitting and reassembly
//!
//! A logical read or write may name more data than one PDU can carry. The
//! planner packs small items into shared requests and cuts oversized items
//! into contiguous fragments, each sized to a whole number of elements. The
//! assemblers put results back together by item and byte range, so replies
//! may be processed in any order. Runs of bits go out as one single-bit item
//! per bit, since a bit item carries exactly one bit on the wire.
//!
//! Fixed overhead per single-item request, in bytes:
//!
//! | direction | header | parameter | item | data header | total |
//! |-----------|--------|-----------|------|-------------|-------|
//! | read      | 12     | 2         |      | 4           | 18    |
//! | write     | 10     | 2         | 12   | 4           | 28    |

use crate::item::{DataItem, DATA_ITEM_HEADER_LENGTH, ITEM_SPEC_LENGTH, MAX_ITEMS_PER_REQUEST};
use crate::pdu::{ACK_HEADER_LENGTH, JOB_HEADER_LENGTH};
use bytes::Bytes;
use s7_core::{AddressingDescriptor, DataType, ReturnCode, S7Error, S7Result};
use std::ops::Range;

/// Overhead of a single-item read, measured on the acknowledgement
pub const READ_OVERHEAD: usize = ACK_HEADER_LENGTH + 2 + DATA_ITEM_HEADER_LENGTH;

/// Overhead of a single-item write, measured on the job
pub const WRITE_OVERHEAD: usize = JOB_HEADER_LENGTH + 2 + ITEM_SPEC_LENGTH + DATA_ITEM_HEADER_LENGTH;

/// One item or item fragment placed in a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Index of the logical item in the caller's list
    pub item: usize,
    /// Position of this fragment within its item
    pub position: usize,
    /// Descriptor actually sent on the wire
    pub descriptor: AddressingDescriptor,
    /// Byte range within the logical item
    pub range: Range<usize>,
}

/// Size model of one request/reply pair
struct Sizing {
    overhead: usize,
    request_base: usize,
    request_per_item: usize,
    request_carries_data: bool,
    response_base: usize,
    response_per_item: usize,
    response_carries_data: bool,
}

const READ_SIZING: Sizing = Sizing {
    overhead: READ_OVERHEAD,
    request_base: JOB_HEADER_LENGTH + 2,
    request_per_item: ITEM_SPEC_LENGTH,
    request_carries_data: false,
    response_base: ACK_HEADER_LENGTH + 2,
    response_per_item: DATA_ITEM_HEADER_LENGTH,
    response_carries_data: true,
};

const WRITE_SIZING: Sizing = Sizing {
    overhead: WRITE_OVERHEAD,
    request_base: JOB_HEADER_LENGTH + 2,
    request_per_item: ITEM_SPEC_LENGTH + DATA_ITEM_HEADER_LENGTH,
    request_carries_data: true,
    response_base: ACK_HEADER_LENGTH + 2,
    response_per_item: 1,
    response_carries_data: false,
};

impl Sizing {
    /// Request and reply size of a batch, counting a pad byte for every odd item
    fn batch_sizes(&self, batch: &[Fragment]) -> (usize, usize) {
        let data: usize = batch
            .iter()
            .map(|f| f.range.len() + f.range.len() % 2)
            .sum();
        let request = self.request_base
            + batch.len() * self.request_per_item
            + if self.request_carries_data { data } else { 0 };
        let response = self.response_base
            + batch.len() * self.response_per_item
            + if self.response_carries_data { data } else { 0 };
        (request, response)
    }

    /// Add a fragment to the open batch, closing the batch first if the
    /// fragment would overflow it
    fn pack(
        &self,
        requests: &mut Vec<Vec<Fragment>>,
        batch: &mut Vec<Fragment>,
        fragment: Fragment,
        pdu_size: usize,
    ) {
        batch.push(fragment);
        let (request, response) = self.batch_sizes(batch);
        let full = batch.len() > MAX_ITEMS_PER_REQUEST || request > pdu_size || response > pdu_size;
        if full && batch.len() > 1 {
            if let Some(fragment) = batch.pop() {
                requests.push(std::mem::take(batch));
                batch.push(fragment);
            }
        }
    }
}

/// Requests needed for one logical read or write
#[derive(Debug, Clone, Default)]
pub struct RequestPlan {
    requests: Vec<Vec<Fragment>>,
}

impl RequestPlan {
    /// Plan a read of `descriptors` for the negotiated `pdu_size`
    pub fn for_read(descriptors: &[AddressingDescriptor], pdu_size: u16) -> S7Result<Self> {
        Self::plan(descriptors, pdu_size, &READ_SIZING)
    }

    /// Plan a write of `descriptors` for the negotiated `pdu_size`
    pub fn for_write(descriptors: &[AddressingDescriptor], pdu_size: u16) -> S7Result<Self> {
        Self::plan(descriptors, pdu_size, &WRITE_SIZING)
    }

    fn plan(descriptors: &[AddressingDescriptor], pdu_size: u16, sizing: &Sizing) -> S7Result<Self> {
        let pdu_size = pdu_size as usize;
        if pdu_size <= sizing.overhead {
            return Err(S7Error::InvalidData(format!(
                "PDU size {} leaves no room for data",
                pdu_size
            )));
        }
        let capacity = pdu_size - sizing.overhead;

        let mut requests = Vec::new();
        let mut batch: Vec<Fragment> = Vec::new();
        for (item, descriptor) in descriptors.iter().enumerate() {
            descriptor.validate()?;
            let length = descriptor.byte_length();
            if descriptor.data_type() == DataType::Bit {
                // one single-bit item per bit
                for bit in 0..descriptor.count() {
                    let fragment = Fragment {
                        item,
                        position: bit,
                        descriptor: descriptor.slice(bit, 1)?,
                        range: bit..bit + 1,
                    };
                    sizing.pack(&mut requests, &mut batch, fragment, pdu_size);
                }
                continue;
            }
            if length <= capacity {
                let fragment = Fragment {
                    item,
                    position: 0,
                    descriptor: *descriptor,
                    range: 0..length,
                };
                sizing.pack(&mut requests, &mut batch, fragment, pdu_size);
                continue;
            }

            let width = descriptor.data_type().width();
            let per_fragment = (capacity / width).min(u16::MAX as usize);
            if per_fragment == 0 {
                return Err(S7Error::InvalidData(format!(
                    "PDU size {} cannot carry one element of {}",
                    pdu_size, descriptor
                )));
            }
            let mut element = 0;
            let mut position = 0;
            while element < descriptor.count() {
                let count = per_fragment.min(descriptor.count() - element);
                let start = element * width;
                requests.push(vec![Fragment {
                    item,
                    position,
                    descriptor: descriptor.slice(element, count)?,
                    range: start..start + count * width,
                }]);
                element += count;
                position += 1;
            }
        }
        if !batch.is_empty() {
            requests.push(batch);
        }
        log::debug!(
            "Planned {} item(s) into {} request(s) at PDU size {}",
            descriptors.len(),
            requests.len(),
            pdu_size
        );
        Ok(Self { requests })
    }

    pub fn requests(&self) -> &[Vec<Fragment>] {
        &self.requests
    }

    pub fn into_requests(self) -> Vec<Vec<Fragment>> {
        self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Collects read fragments into per-item results
#[derive(Debug)]
pub struct ReadAssembler {
    buffers: Vec<Vec<u8>>,
    received: Vec<usize>,
    errors: Vec<Option<ReturnCode>>,
}

impl ReadAssembler {
    pub fn new(descriptors: &[AddressingDescriptor]) -> Self {
        Self {
            buffers: descriptors.iter().map(|d| vec![0u8; d.byte_length()]).collect(),
            received: vec![0; descriptors.len()],
            errors: vec![None; descriptors.len()],
        }
    }

    /// Place the reply to one fragment
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Protocol` if a successful item carries a different
    /// number of bytes than the fragment asked for.
    pub fn accept(&mut self, fragment: &Fragment, item: DataItem) -> S7Result<()> {
        if !item.return_code.is_success() {
            log::debug!(
                "Item {} fragment {} failed: {}",
                fragment.item,
                fragment.position,
                item.return_code
            );
            self.errors[fragment.item].get_or_insert(item.return_code);
            return Ok(());
        }
        if item.data.len() != fragment.range.len() {
            return Err(S7Error::Protocol(format!(
                "Read of {} returned {} bytes, expected {}",
                fragment.descriptor,
                item.data.len(),
                fragment.range.len()
            )));
        }
        self.buffers[fragment.item][fragment.range.clone()].copy_from_slice(&item.data);
        self.received[fragment.item] += item.data.len();
        Ok(())
    }

    /// Per-item results in the caller's order
    pub fn finish(self) -> Vec<S7Result<Bytes>> {
        self.buffers
            .into_iter()
            .zip(self.received)
            .zip(self.errors)
            .map(|((buffer, received), error)| match error {
                Some(code) => Err(S7Error::Item(code)),
                None if received != buffer.len() => Err(S7Error::Protocol(format!(
                    "Item incomplete: {} of {} bytes received",
                    received,
                    buffer.len()
                ))),
                None => Ok(Bytes::from(buffer)),
            })
            .collect()
    }
}

/// Collects write fragment return codes into per-item results
#[derive(Debug)]
pub struct WriteAssembler {
    pending: Vec<usize>,
    errors: Vec<Option<ReturnCode>>,
}

impl WriteAssembler {
    pub fn new(plan: &RequestPlan, items: usize) -> Self {
        let mut pending = vec![0; items];
        for fragment in plan.requests().iter().flatten() {
            pending[fragment.item] += 1;
        }
        Self {
            pending,
            errors: vec![None; items],
        }
    }

    pub fn accept(&mut self, fragment: &Fragment, code: ReturnCode) {
        if code.is_success() {
            self.pending[fragment.item] = self.pending[fragment.item].saturating_sub(1);
        } else {
            log::debug!(
                "Write of item {} fragment {} failed: {}",
                fragment.item,
                fragment.position,
                code
            );
            self.errors[fragment.item].get_or_insert(code);
        }
    }

    pub fn finish(self) -> Vec<S7Result<()>> {
        self.pending
            .into_iter()
            .zip(self.errors)
            .map(|(pending, error)| match error {
                Some(code) => Err(S7Error::Item(code)),
                None if pending > 0 => Err(S7Error::Protocol(format!(
                    "{} fragment(s) never acknowledged",
                    pending
                ))),
                None => Ok(()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{encode_read_response, read_var_parameter, write_var_request};
    use crate::pdu::Pdu;
    use s7_core::area::DataTransport;
    use crate::item::encode_write_response;
    use crate::setup::{MAX_PDU_SIZE, MIN_PDU_SIZE};
    use s7_core::Area;

    fn db_bytes(offset: u32, len: usize) -> AddressingDescriptor {
        AddressingDescriptor::bytes(Area::DataBlock, 1, offset, len).unwrap()
    }

    fn check_contiguous(plan: &RequestPlan, descriptors: &[AddressingDescriptor]) {
        for (index, descriptor) in descriptors.iter().enumerate() {
            let mut fragments: Vec<&Fragment> = plan
                .requests()
                .iter()
                .flatten()
                .filter(|f| f.item == index)
                .collect();
            fragments.sort_by_key(|f| f.position);
            let mut next = 0;
            for fragment in fragments {
                assert_eq!(fragment.range.start, next);
                assert_eq!(fragment.range.len() % descriptor.data_type().width(), 0);
                if descriptor.data_type() == DataType::Bit {
                    assert_eq!(fragment.descriptor.count(), 1);
                    assert_eq!(
                        fragment.descriptor.wire_address(),
                        descriptor.wire_address() + fragment.range.start as u32
                    );
                } else {
                    let step = if descriptor.area().is_element_addressed() {
                        descriptor.data_type().width()
                    } else {
                        1
                    };
                    assert_eq!(
                        fragment.descriptor.byte_offset() as usize,
                        descriptor.byte_offset() as usize + fragment.range.start / step
                    );
                }
                next = fragment.range.end;
            }
            assert_eq!(next, descriptor.byte_length());
        }
    }

    #[test]
    fn test_overheads() {
        assert_eq!(READ_OVERHEAD, 18);
        assert_eq!(WRITE_OVERHEAD, 28);
    }

    #[test]
    fn test_large_read_fits_pdu() {
        let descriptors = [db_bytes(0, 6534)];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        assert_eq!(plan.len(), 30);
        check_contiguous(&plan, &descriptors);

        for request in plan.requests() {
            let parameter = read_var_parameter(request.iter().map(|f| &f.descriptor)).unwrap();
            let job = Pdu::job(1, parameter, Bytes::new());
            assert!(job.encoded_len() <= 240);

            let items: Vec<DataItem> = request
                .iter()
                .map(|f| DataItem::success(DataTransport::Byte, Bytes::from(vec![0u8; f.range.len()])))
                .collect();
            let (parameter, data) = encode_read_response(&items).unwrap();
            let reply = Pdu::AckData { sequence: 1, parameter, data };
            assert!(reply.encoded_len() <= 240);
        }
    }

    #[test]
    fn test_large_write_fits_pdu() {
        let descriptors = [
            AddressingDescriptor::new(Area::DataBlock, 2, 100, DataType::DWord, 1000).unwrap(),
        ];
        let plan = RequestPlan::for_write(&descriptors, 240).unwrap();
        check_contiguous(&plan, &descriptors);
        let payload = vec![0x5Au8; 4000];
        for request in plan.requests() {
            let items: Vec<(AddressingDescriptor, &[u8])> = request
                .iter()
                .map(|f| (f.descriptor, &payload[f.range.clone()]))
                .collect();
            let (parameter, data) = write_var_request(&items).unwrap();
            assert!(Pdu::job(1, parameter, data).encoded_len() <= 240);
        }
    }

    #[test]
    fn test_small_items_are_packed_in_order() {
        let descriptors = [
            db_bytes(0, 1),
            AddressingDescriptor::bit(Area::DataBlock, 1, 16, 0).unwrap(),
            db_bytes(20, 10),
            AddressingDescriptor::bit(Area::Flags, 0, 1, 3).unwrap(),
        ];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        assert_eq!(plan.len(), 1);
        let items: Vec<usize> = plan.requests()[0].iter().map(|f| f.item).collect();
        assert_eq!(items, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_packing_respects_reply_size() {
        // two items of 120 bytes cannot share a 240-byte acknowledgement
        let descriptors = [db_bytes(0, 120), db_bytes(200, 120), db_bytes(400, 2)];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.requests()[0].len(), 1);
        assert_eq!(plan.requests()[1].len(), 2);
    }

    #[test]
    fn test_element_widths_respected() {
        let descriptors = [
            AddressingDescriptor::new(Area::DataBlock, 3, 0, DataType::Real, 200).unwrap(),
            AddressingDescriptor::new(Area::Timer, 0, 0, DataType::Timer, 300).unwrap(),
        ];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        check_contiguous(&plan, &descriptors);
        // timers are addressed by element index
        let second = plan
            .requests()
            .iter()
            .flatten()
            .find(|f| f.item == 1 && f.position == 1)
            .unwrap();
        assert_eq!(second.descriptor.byte_offset() as usize, second.range.start / 2);
    }

    #[test]
    fn test_reassembly_is_order_independent() {
        let descriptors = [db_bytes(0, 1000), db_bytes(2000, 3)];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        let source: Vec<Vec<u8>> = descriptors
            .iter()
            .map(|d| (0..d.byte_length()).map(|i| (i * 7 % 251) as u8).collect())
            .collect();

        let mut fragments: Vec<&Fragment> = plan.requests().iter().flatten().collect();
        fragments.reverse();
        fragments.swap(0, 2);
        let mut assembler = ReadAssembler::new(&descriptors);
        for fragment in fragments {
            let data = Bytes::copy_from_slice(&source[fragment.item][fragment.range.clone()]);
            assembler
                .accept(fragment, DataItem::success(DataTransport::Byte, data))
                .unwrap();
        }
        let results = assembler.finish();
        assert_eq!(&results[0].as_ref().unwrap()[..], &source[0][..]);
        assert_eq!(&results[1].as_ref().unwrap()[..], &source[1][..]);
    }

    #[test]
    fn test_failed_fragment_fails_only_its_item() {
        let descriptors = [db_bytes(0, 500), db_bytes(600, 4)];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        let mut assembler = ReadAssembler::new(&descriptors);
        for fragment in plan.requests().iter().flatten() {
            let item = if fragment.item == 0 && fragment.position == 1 {
                DataItem::error(ReturnCode::AddressOutOfRange)
            } else {
                DataItem::success(
                    DataTransport::Byte,
                    Bytes::from(vec![1u8; fragment.range.len()]),
                )
            };
            assembler.accept(fragment, item).unwrap();
        }
        let results = assembler.finish();
        assert!(matches!(results[0], Err(S7Error::Item(ReturnCode::AddressOutOfRange))));
        assert_eq!(&results[1].as_ref().unwrap()[..], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_wrong_fragment_length_is_protocol_error() {
        let descriptors = [db_bytes(0, 4)];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        let mut assembler = ReadAssembler::new(&descriptors);
        let fragment = &plan.requests()[0][0];
        let err = assembler
            .accept(fragment, DataItem::success(DataTransport::Byte, Bytes::from_static(&[1, 2])))
            .unwrap_err();
        assert!(matches!(err, S7Error::Protocol(_)));
    }

    #[test]
    fn test_write_assembler() {
        let descriptors = [db_bytes(0, 400), db_bytes(500, 2)];
        let plan = RequestPlan::for_write(&descriptors, 240).unwrap();
        let mut assembler = WriteAssembler::new(&plan, descriptors.len());
        for fragment in plan.requests().iter().flatten() {
            let code = if fragment.item == 1 {
                ReturnCode::AccessDenied
            } else {
                ReturnCode::Success
            };
            assembler.accept(fragment, code);
        }
        let results = assembler.finish();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(S7Error::Item(ReturnCode::AccessDenied))));
    }

    /// Encode every request of a plan with its largest possible reply and
    /// check both against the PDU size
    fn assert_plan_fits(descriptors: &[AddressingDescriptor], pdu_size: u16, write: bool) {
        let plan = if write {
            RequestPlan::for_write(descriptors, pdu_size).unwrap()
        } else {
            RequestPlan::for_read(descriptors, pdu_size).unwrap()
        };
        check_contiguous(&plan, descriptors);
        for request in plan.requests() {
            let (job, reply) = if write {
                let payload = vec![0u8; request.iter().map(|f| f.range.len()).max().unwrap_or(0)];
                let items: Vec<(AddressingDescriptor, &[u8])> = request
                    .iter()
                    .map(|f| (f.descriptor, &payload[..f.range.len()]))
                    .collect();
                let (parameter, data) = write_var_request(&items).unwrap();
                let codes = vec![ReturnCode::Success; request.len()];
                let (ack_parameter, ack_data) = encode_write_response(&codes).unwrap();
                (
                    Pdu::job(1, parameter, data),
                    Pdu::AckData { sequence: 1, parameter: ack_parameter, data: ack_data },
                )
            } else {
                let parameter = read_var_parameter(request.iter().map(|f| &f.descriptor)).unwrap();
                let items: Vec<DataItem> = request
                    .iter()
                    .map(|f| {
                        DataItem::success(
                            f.descriptor.data_type().data_transport(),
                            Bytes::from(vec![0u8; f.range.len()]),
                        )
                    })
                    .collect();
                let (ack_parameter, ack_data) = encode_read_response(&items).unwrap();
                (
                    Pdu::job(1, parameter, Bytes::new()),
                    Pdu::AckData { sequence: 1, parameter: ack_parameter, data: ack_data },
                )
            };
            assert!(
                job.encoded_len() <= pdu_size as usize,
                "job of {} bytes at PDU size {}",
                job.encoded_len(),
                pdu_size
            );
            assert!(
                reply.encoded_len() <= pdu_size as usize,
                "reply of {} bytes at PDU size {}",
                reply.encoded_len(),
                pdu_size
            );
        }
    }

    #[test]
    fn test_every_pdu_size_fits() {
        let single = [db_bytes(0, 6534)];
        let words = [AddressingDescriptor::new(Area::DataBlock, 2, 10, DataType::DWord, 1000).unwrap()];
        let mixed = [
            db_bytes(0, 1),
            AddressingDescriptor::bit(Area::DataBlock, 1, 16, 3).unwrap(),
            db_bytes(20, 3),
            AddressingDescriptor::new(Area::Flags, 0, 4, DataType::Word, 7).unwrap(),
            AddressingDescriptor::bits(Area::Flags, 0, 1, 5, 10).unwrap(),
            db_bytes(100, 333),
            AddressingDescriptor::new(Area::DataBlock, 3, 0, DataType::Real, 50).unwrap(),
            db_bytes(1000, 2),
            AddressingDescriptor::new(Area::Timer, 0, 0, DataType::Timer, 30).unwrap(),
        ];
        for pdu_size in MIN_PDU_SIZE..=MAX_PDU_SIZE {
            for write in [false, true] {
                assert_plan_fits(&single, pdu_size, write);
                assert_plan_fits(&words, pdu_size, write);
                assert_plan_fits(&mixed, pdu_size, write);
            }
        }
    }

    #[test]
    fn test_item_lengths_around_capacity() {
        for pdu_size in [MIN_PDU_SIZE, 240, 480, MAX_PDU_SIZE] {
            let read_capacity = pdu_size as usize - READ_OVERHEAD;
            let write_capacity = pdu_size as usize - WRITE_OVERHEAD;
            let lengths = [
                1,
                2,
                write_capacity - 1,
                write_capacity,
                write_capacity + 1,
                read_capacity,
                read_capacity + 1,
                3 * read_capacity + 5,
            ];
            for length in lengths {
                assert_plan_fits(&[db_bytes(0, length)], pdu_size, false);
                assert_plan_fits(&[db_bytes(0, length)], pdu_size, true);
                assert_plan_fits(&[db_bytes(0, length), db_bytes(9000, length)], pdu_size, false);
            }
        }
    }

    #[test]
    fn test_bit_run_becomes_single_bit_items() {
        let descriptors = [
            db_bytes(0, 2),
            AddressingDescriptor::bits(Area::DataBlock, 1, 4, 5, 8).unwrap(),
        ];
        let plan = RequestPlan::for_read(&descriptors, 240).unwrap();
        assert_eq!(plan.len(), 1);
        check_contiguous(&plan, &descriptors);
        let bits: Vec<(u32, u8)> = plan.requests()[0]
            .iter()
            .filter(|f| f.item == 1)
            .map(|f| (f.descriptor.byte_offset(), f.descriptor.bit_offset()))
            .collect();
        assert_eq!(
            bits,
            vec![(4, 5), (4, 6), (4, 7), (5, 0), (5, 1), (5, 2), (5, 3), (5, 4)]
        );

        let mut assembler = ReadAssembler::new(&descriptors);
        for fragment in plan.requests().iter().flatten().rev() {
            let value = if fragment.item == 1 { (fragment.position % 2) as u8 } else { 7 };
            let data = Bytes::from(vec![value; fragment.range.len()]);
            assembler
                .accept(fragment, DataItem::success(fragment.descriptor.data_type().data_transport(), data))
                .unwrap();
        }
        let results = assembler.finish();
        assert_eq!(&results[1].as_ref().unwrap()[..], &[0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_invalid_plans() {
        assert!(RequestPlan::for_read(&[db_bytes(0, 1)], 18).is_err());
        let plan = RequestPlan::for_read(&[], 240).unwrap();
        assert!(plan.is_empty());
    }
}
