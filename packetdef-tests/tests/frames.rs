// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::Bytes;
use googletest::prelude::*;
use packetdef_runtime::{fold, Builder, Crc8, DecodeError, EncodeError};

use packetdef_tests::custom::{Name, Token};
use packetdef_tests::frames::*;

const TOKEN: Token = Token([0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);

/// Recompute the trailing checksum after editing an encoded frame.
fn reseal(mut frame: Vec<u8>) -> Bytes {
    let end = frame.len() - 1;
    frame[end] = fold(&mut Crc8::default(), &frame[..end]) as u8;
    frame.into()
}

#[test]
fn data_round_trip() {
    let bytes = DataBuilder::create(5, TOKEN, 0x1234).unwrap().build().unwrap();
    assert_eq!(bytes.len(), 12);
    assert_eq!(bytes[1], 0x7e);
    assert_eq!(bytes[2], 8);
    assert_eq!(&bytes[3..9], &TOKEN.0);
    assert_eq!(&bytes[9..11], &[0x12, 0x34]);
    assert_eq!(u64::from(bytes[11]), fold(&mut Crc8::default(), &bytes[..11]));

    let view = DataView::new(bytes.clone());
    assert!(view.is_valid());
    assert_that!(view.get_kind(), ok(eq(Kind::Data)));
    assert_that!(view.get_seq(), ok(eq(5)));
    assert_that!(view.get_token(), ok(eq(TOKEN)));
    assert_that!(view.get_value(), ok(eq(0x1234)));
    assert_that!(view.get_crc(), ok(eq(bytes[11])));
    assert_that!(view.parent().payload(), ok(eq(bytes.slice(3..11))));
}

#[test]
fn encoded_len_matches_the_encoding() {
    let builder = DataBuilder::create(0, TOKEN, 1).unwrap();
    assert_eq!(builder.encoded_len(), 12);
    assert_that!(builder.encode_to_vec().map(|bytes| bytes.len()), ok(eq(12)));

    let builder = NamedBuilder::create(0, Name("relay".to_owned()), 1).unwrap();
    assert_eq!(builder.encoded_len(), 4 + 6 + 1);
    assert_that!(builder.encode_to_vec().map(|bytes| bytes.len()), ok(eq(11)));
}

#[test]
fn corrupted_checksum_invalidates_the_frame() {
    let mut bytes = DataBuilder::create(5, TOKEN, 0x1234).unwrap().encode_to_vec().unwrap();
    bytes[10] ^= 0xff;
    let bytes = Bytes::from(bytes);

    let view = DataView::new(bytes.clone());
    assert!(!view.is_valid());
    assert_that!(view.get_value(), err(eq(DecodeError::InvalidPacket)));
    assert!(!view.parent().is_valid());
    assert!(!FrameView::new(bytes).is_valid());
}

#[test]
fn frame_builder_matches_the_derived_builder() {
    let ack = AckBuilder::create(9, 3).unwrap().build().unwrap();
    let frame = FrameBuilder::create(Kind::Ack, 9, vec![3]).unwrap().build().unwrap();
    assert_eq!(ack, frame);

    let view = AckView::new(frame);
    assert!(view.is_valid());
    assert_that!(view.get_flags(), ok(eq(3)));
    assert_that!(view.get_kind(), ok(eq(Kind::Ack)));
}

#[test]
fn constraints_select_the_derived_packet() {
    let ack = AckBuilder::create(1, 3).unwrap().build().unwrap();
    assert!(FrameView::new(ack.clone()).is_valid());
    assert!(!DataView::new(ack.clone()).is_valid());
    assert!(!NamedView::new(ack).is_valid());
}

#[test]
fn scalar_parameters_are_range_checked() {
    assert_that!(
        FrameBuilder::new(Kind::Ack, 16),
        err(eq(EncodeError::InvalidScalarValue {
            packet: "Frame",
            field: "seq",
            value: 16,
            maximum_value: 15,
        }))
    );
    // Derived builders delegate the inherited parameters.
    assert!(matches!(
        AckBuilder::create(16, 0),
        Err(EncodeError::InvalidScalarValue { packet: "Frame", field: "seq", .. })
    ));
}

#[test]
fn payload_size_is_bounded() {
    let builder = FrameBuilder::create(Kind::Data, 0, vec![0; 256]).unwrap();
    assert!(matches!(
        builder.build(),
        Err(EncodeError::SizeOverflow { size: 256, maximum_size: 255, .. })
    ));
}

#[test]
fn unknown_tags_invalidate_the_frame() {
    let mut bytes = AckBuilder::create(1, 3).unwrap().encode_to_vec().unwrap();
    // Both nibbles set: no tag of `Kind` has the value 15.
    bytes[0] = 0xff;
    let bytes = reseal(bytes);
    let view = FrameView::new(bytes);
    assert!(!view.is_valid());
    assert_that!(view.get_kind(), err(eq(DecodeError::InvalidPacket)));
}

#[test]
fn custom_values_are_validated() {
    assert_that!(
        DataBuilder::create(0, Token([0; 6]), 1),
        err(eq(EncodeError::InvalidCustomValue { packet: "Data", field: "token" }))
    );

    let mut bytes = DataBuilder::create(0, TOKEN, 1).unwrap().encode_to_vec().unwrap();
    bytes[3..9].fill(0);
    let view = DataView::new(reseal(bytes));
    assert!(view.parent().is_valid());
    assert!(!view.is_valid());
}

#[test]
fn named_round_trip() {
    let name = Name("gateway".to_owned());
    let bytes = NamedBuilder::create(2, name.clone(), 64).unwrap().build().unwrap();
    assert_eq!(bytes.len(), 4 + 8 + 1);
    assert_eq!(bytes[2], 9);
    assert_eq!(&bytes[3..11], b"\x07gateway");

    let view = NamedView::new(bytes);
    assert!(view.is_valid());
    assert_that!(view.get_kind(), ok(eq(Kind::Named)));
    assert_that!(view.get_name(), ok(eq(name)));
    assert_that!(view.get_ttl(), ok(eq(64)));
}

#[test]
fn named_size_past_the_payload_is_invalid() {
    let mut bytes =
        NamedBuilder::create(2, Name("gateway".to_owned()), 64).unwrap().encode_to_vec().unwrap();
    bytes[3] = 200;
    let view = NamedView::new(reseal(bytes));
    assert!(view.parent().is_valid());
    assert!(!view.is_valid());
    assert_that!(view.get_name(), err(eq(DecodeError::InvalidPacket)));
}

#[test]
fn oversized_names_are_rejected() {
    assert!(matches!(
        NamedBuilder::create(0, Name("x".repeat(300)), 0),
        Err(EncodeError::InvalidCustomSize { packet: "Named", field: "name", size: 301, .. })
    ));
}
