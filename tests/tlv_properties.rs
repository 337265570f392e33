//! Property tests for the TLV8 codec

use mico_hap::protocol::pairing::{TlvDecoder, TlvEncoder, TlvReader, TlvType, get_next};
use proptest::prelude::*;

fn item_type() -> impl Strategy<Value = TlvType> {
    prop::sample::select(vec![
        TlvType::Method,
        TlvType::Identifier,
        TlvType::Salt,
        TlvType::PublicKey,
        TlvType::Proof,
        TlvType::EncryptedData,
        TlvType::State,
        TlvType::Error,
        TlvType::Certificate,
        TlvType::Signature,
        TlvType::Permissions,
    ])
}

proptest! {
    #[test]
    fn long_values_reassemble(tlv_type in item_type(), value in prop::collection::vec(any::<u8>(), 0..1200)) {
        let encoded = TlvEncoder::new().add(tlv_type, &value).build();
        let decoded = TlvDecoder::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.get(tlv_type), Some(value.as_slice()));
    }

    #[test]
    fn separated_groups_stay_apart(values in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..6)) {
        let mut encoder = TlvEncoder::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                encoder = encoder.add_separator();
            }
            encoder = encoder.add(TlvType::Identifier, value);
        }

        let groups = TlvDecoder::decode_list(&encoder.build()).unwrap();
        prop_assert_eq!(groups.len(), values.len());
        for (group, value) in groups.iter().zip(&values) {
            prop_assert_eq!(group.get(TlvType::Identifier), Some(value.as_slice()));
        }
    }

    #[test]
    fn reader_stays_in_bounds(data in prop::collection::vec(any::<u8>(), 0..600)) {
        let mut consumed = 0;
        for record in TlvReader::new(&data) {
            consumed += 2 + record.value.len();
        }
        prop_assert!(consumed <= data.len());
        let _ = TlvDecoder::decode(&data);
    }

    #[test]
    fn get_next_walks_concatenated_records(
        records in prop::collection::vec((0u8..0xFE, prop::collection::vec(any::<u8>(), 0..255)), 0..8)
    ) {
        let mut data = Vec::new();
        for (tlv_type, value) in &records {
            data.push(*tlv_type);
            data.push(u8::try_from(value.len()).unwrap());
            data.extend_from_slice(value);
        }

        let mut rest = data.as_slice();
        for (tlv_type, value) in &records {
            let (record, next) = get_next(rest).unwrap();
            prop_assert_eq!(record.tlv_type, *tlv_type);
            prop_assert_eq!(record.value, value.as_slice());
            rest = next;
        }
        prop_assert!(get_next(rest).is_none());
    }
}

#[test]
fn truncated_record_is_rejected() {
    assert!(TlvDecoder::decode(&[0x06, 0x02, 0x01]).is_err());
    assert!(TlvDecoder::decode(&[0x06]).is_err());
}

#[test]
fn get_next_clamps_overlong_length() {
    let (record, rest) = get_next(&[0x01, 0x10, 0xAA, 0xBB]).unwrap();
    assert_eq!(record.value, &[0xAA, 0xBB]);
    assert!(rest.is_empty());
}
