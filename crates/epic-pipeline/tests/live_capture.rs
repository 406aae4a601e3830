//! UDP loopback test for the live capture path.

use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::Duration;

use chrono::TimeZone;

use epic_core::{ObservingConfig, SequenceHeader};
use epic_pipeline::chips::{ChipsHeader, STANDS_PER_SRC};
use epic_pipeline::{LiveCaptureStage, Stage, StageContext};
use epic_ring::{Residency, Ring};

const NTS: usize = 10;
const NSRC: usize = 2;
const NCHAN: usize = 3;
const NPOL: usize = 2;

fn pattern(seq: u64, src: u8, c: usize, slot: usize, p: usize) -> u8 {
    (seq as usize + src as usize * 3 + c * 5 + slot * 7 + p * 11) as u8
}

fn packet(seq: u64, src: u8) -> Vec<u8> {
    let hdr = ChipsHeader {
        seq,
        chan0: 1840,
        nchan: NCHAN as u16,
        src,
        nsrc: NSRC as u8,
        npol: NPOL as u8,
    };
    let mut out = hdr.encode().to_vec();
    for c in 0..NCHAN {
        for slot in 0..STANDS_PER_SRC {
            for p in 0..NPOL {
                out.push(pattern(seq, src, c, slot, p));
            }
        }
    }
    out
}

#[test]
fn live_capture_reassembles_packets() {
    let addr: SocketAddr = "127.0.0.1:47815".parse().unwrap();
    let ring = Ring::new("capture", Residency::Host);
    let ctx = StageContext::new(ObservingConfig::default());
    let utc_start = chrono::Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();

    let mut stage = LiveCaptureStage::new(ring.clone(), addr, NSRC, NTS, 9000, utc_start, None);
    let stage_ctx = ctx.clone();
    let capture = thread::spawn(move || stage.run(&stage_ctx));

    // Let the socket come up, then send two full windows plus a flusher.
    thread::sleep(Duration::from_millis(100));
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    for seq in 0..=(2 * NTS as u64) {
        for src in 0..NSRC as u8 {
            sender.send_to(&packet(seq, src), addr).unwrap();
        }
        if seq % 5 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }

    let mut stream = ring.read(true);
    let mut seq_reader = stream.next().expect("live sequence");
    let hdr = SequenceHeader::from_json(seq_reader.header()).unwrap();
    assert_eq!(hdr.nstand, NSRC * STANDS_PER_SRC);
    assert_eq!(hdr.nchan, NCHAN);
    assert_eq!(hdr.npol, NPOL);
    assert_eq!(hdr.nbit, 4);
    assert_eq!(hdr.axes, "time,chan,stand,pol");
    assert_eq!(hdr.chan0, 1840);
    // time_tag = 1 s * FS + seq0 * (FS / CHAN_BW) with seq0 = 0.
    assert_eq!(hdr.time_tag, 196_000_000);

    let nstand = hdr.nstand;
    let span = seq_reader.next_span().expect("first gulp");
    assert_eq!(span.size(), NTS * NCHAN * nstand * NPOL);
    let data = span.data();
    for (seq, src, c, slot, p) in [
        (0u64, 0u8, 0usize, 0usize, 0usize),
        (3, 1, 2, 15, 1),
        (9, 0, 1, 7, 0),
    ] {
        let t = seq as usize;
        let idx = ((t * NCHAN + c) * nstand + src as usize * STANDS_PER_SRC + slot) * NPOL + p;
        assert_eq!(data[idx], pattern(seq, src, c, slot, p), "({seq},{src},{c},{slot},{p})");
    }
    drop(span);

    ctx.request_shutdown();
    capture.join().unwrap().unwrap();
}
