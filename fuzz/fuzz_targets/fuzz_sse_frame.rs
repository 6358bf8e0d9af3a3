#![no_main]

use fairmocracy_client::transports::frame::SseDecoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feeding the input whole or split at an arbitrary point must decode
    // to the same events.
    let mut whole = SseDecoder::new();
    let expected = whole.feed(data);

    let split = data.first().map_or(0, |b| usize::from(*b)).min(data.len());
    let (head, tail) = data.split_at(split);
    let mut chunked = SseDecoder::new();
    let mut events = chunked.feed(head);
    events.extend(chunked.feed(tail));

    assert_eq!(expected, events);
});
