//! Stream-mode (TLS) record layer tests.

use tls_mps::{
    sim::RamLink, Config, ContentType, EarlyDataPolicy, EpochUsage, Error, HmacSha256, Identity,
    Mode, ProtocolVersion, RecordLayer, Xor,
};

fn config() -> Config {
    let mut cfg: Config = Config::new(Mode::Stream);
    cfg.add_type(ContentType::Handshake, true, true, false)
        .unwrap();
    cfg.add_type(ContentType::Alert, false, false, false).unwrap();
    cfg.add_type(ContentType::ApplicationData, false, false, true)
        .unwrap();
    cfg.set_max_plain_out(32);
    cfg
}

fn record(ctype: ContentType, payload: &[u8]) -> Vec<u8> {
    let mut rec: Vec<u8> = vec![u8::from(ctype), 0x03, 0x03];
    rec.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    rec.extend_from_slice(payload);
    rec
}

/// Split a dispatched byte stream back into `(type, payload)` records.
fn split_records(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut records: Vec<(u8, Vec<u8>)> = Vec::new();
    while !bytes.is_empty() {
        let len: usize = usize::from(u16::from_be_bytes([bytes[3], bytes[4]]));
        records.push((bytes[0], bytes[5..5 + len].to_vec()));
        bytes = &bytes[5 + len..];
    }
    records
}

mod read {
    use super::*;

    #[test]
    fn single_record() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&[0x17, 0x03, 0x03, 0x00, 0x05, b'H', b'E', b'L', b'L', b'O']);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.content_type(), ContentType::ApplicationData);
        assert_eq!(rd.epoch(), epoch);
        assert_eq!(rd.remain(), 5);
        assert_eq!(rd.get_exact(5).unwrap(), b"HELLO");
        rd.commit();
        rd.done().unwrap();

        // nothing else pending
        assert_eq!(mps.read_start().unwrap_err(), Error::WantRead);
    }

    #[test]
    fn handshake_across_two_records() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::Handshake, &[0x01, 0x00, 0x00, 0x08]));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        // the consumer wants 12 bytes but only 4 arrived: take what is
        // there, commit nothing, and pause
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.content_type(), ContentType::Handshake);
        assert_eq!(rd.get(12).unwrap().len(), 4);
        rd.done().unwrap();

        // continuation arrives
        mps.transport_mut()
            .feed_rx(&record(ContentType::Handshake, b"ABCD"));
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.content_type(), ContentType::Handshake);
        assert_eq!(rd.remain(), 8);
        assert_eq!(
            rd.get_exact(8).unwrap(),
            &[0x01, 0x00, 0x00, 0x08, b'A', b'B', b'C', b'D']
        );
        rd.commit();
        rd.done().unwrap();
    }

    #[test]
    fn interleaved_app_data_while_handshake_paused() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::Handshake, &[0x02, 0xAA]));
        link.feed_rx(&record(ContentType::ApplicationData, b"ping"));
        link.feed_rx(&record(ContentType::Handshake, &[0xBB]));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        // partial handshake message pauses
        let rd = mps.read_start().unwrap();
        rd.done().unwrap();

        // application data flows while the handshake stream is paused
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.content_type(), ContentType::ApplicationData);
        assert_eq!(rd.get_exact(4).unwrap(), b"ping");
        rd.commit();
        rd.done().unwrap();

        // handshake resumes with the retained prefix replayed
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.content_type(), ContentType::Handshake);
        assert_eq!(rd.get_exact(3).unwrap(), &[0x02, 0xAA, 0xBB]);
        rd.commit();
        rd.done().unwrap();
    }

    #[test]
    fn dropped_handle_re_enters_record() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::ApplicationData, b"HELLO"));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.get_exact(2).unwrap(), b"HE");
        rd.commit();
        drop(rd);

        // the same record continues where it left off
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.get_exact(3).unwrap(), b"LLO");
        rd.commit();
        rd.done().unwrap();
    }

    #[test]
    fn second_partial_stream_rejected() {
        let mut cfg: Config = config();
        // a second pausable type
        cfg.add_type(ContentType::Ack, true, false, false).unwrap();

        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::Handshake, &[0x01, 0x02]));
        link.feed_rx(&record(ContentType::Ack, &[0x03]));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        // the handshake stream pauses, taking the accumulator with it
        let rd = mps.read_start().unwrap();
        rd.done().unwrap();

        // only one stream may be partial at a time
        let rd = mps.read_start().unwrap();
        assert_eq!(rd.done().unwrap_err(), Error::NeedsAccumulator);
    }

    #[test]
    fn trailing_bytes_on_non_pausable_type() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::ApplicationData, b"HELLO"));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.get_exact(3).unwrap(), b"HEL");
        rd.commit();
        assert_eq!(rd.done().unwrap_err(), Error::InvalidRecord);
    }

    #[test]
    fn partial_record_returns_want_read() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        // header promises 5 bytes, only 2 arrived
        link.feed_rx(&[0x17, 0x03, 0x03, 0x00, 0x05, b'H', b'E']);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        assert_eq!(mps.read_start().unwrap_err(), Error::WantRead);

        mps.transport_mut().feed_rx(b"LLO");
        let mut rd = mps.read_start().unwrap();
        assert_eq!(rd.get_exact(5).unwrap(), b"HELLO");
        rd.commit();
        rd.done().unwrap();
    }

    #[test]
    fn version_pinning() {
        let mut cfg: Config = config();
        cfg.set_version(ProtocolVersion::Tls12);

        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        // DTLS 1.2 version value in a stream-mode record
        link.feed_rx(&[0x17, 0xFE, 0xFD, 0x00, 0x01, 0x00]);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        assert_eq!(mps.read_start().unwrap_err(), Error::InvalidRecord);
    }

    #[test]
    fn early_data_discarded() {
        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::ApplicationData, b"early"));
        link.feed_rx(&record(ContentType::Alert, &[0x02, 0x28]));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        // write permission only: nothing may be read under this epoch yet
        mps.epoch_usage(epoch, EpochUsage::WRITE).unwrap();

        // the application data record is skipped, the alert is fatal
        // because alerts are not early data
        assert_eq!(mps.read_start().unwrap_err(), Error::InvalidRecord);
    }

    #[test]
    fn early_data_rejected() {
        let mut cfg: Config = config();
        cfg.set_early_data(EarlyDataPolicy::Reject);

        let mut rx: [u8; 64] = [0; 64];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::ApplicationData, b"early"));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::WRITE).unwrap();

        assert_eq!(mps.read_start().unwrap_err(), Error::InvalidRecord);
    }

    #[test]
    fn auth_failure_is_fatal() {
        let mut cfg: Config = config();
        cfg.set_max_plain_in(64);

        // a record with a bad tag
        let mut payload: Vec<u8> = b"HELLO".to_vec();
        payload.extend_from_slice(&[0; HmacSha256::TAG_LEN]);

        let mut rx: [u8; 128] = [0; 128];
        let mut tx: [u8; 64] = [0; 64];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.feed_rx(&record(ContentType::ApplicationData, &payload));

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 0] = [];
        let mut mps: RecordLayer<_, HmacSha256> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(Some(HmacSha256::new(b"k"))).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        assert_eq!(mps.read_start().unwrap_err(), Error::InvalidRecord);
    }
}

mod write {
    use super::*;

    #[test]
    fn merge_two_handshake_writes() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::Handshake, epoch).unwrap();
        wr.write_all(&[0xAA; 10]).unwrap();
        wr.done().unwrap();

        let mut wr = mps.write_start(ContentType::Handshake, epoch).unwrap();
        wr.write_all(&[0xBB; 20]).unwrap();
        wr.done().unwrap();

        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, u8::from(ContentType::Handshake));
        assert_eq!(records[0].1.len(), 30);
        assert_eq!(&records[0].1[..10], &[0xAA; 10]);
        assert_eq!(&records[0].1[10..], &[0xBB; 20]);
    }

    #[test]
    fn type_switch_dispatches_open_record() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::Handshake, epoch).unwrap();
        wr.write_all(&[0x14, 0x00, 0x00, 0x00]).unwrap();
        wr.done().unwrap();

        let mut wr = mps.write_start(ContentType::Alert, epoch).unwrap();
        wr.write_all(&[0x01, 0x00]).unwrap();
        wr.done().unwrap();

        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, u8::from(ContentType::Handshake));
        assert_eq!(records[1].0, u8::from(ContentType::Alert));
        assert_eq!(records[1].1, vec![0x01, 0x00]);
    }

    #[test]
    fn alert_is_not_merged() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        for alert in [[0x01, 0x00], [0x01, 0x5A]] {
            let mut wr = mps.write_start(ContentType::Alert, epoch).unwrap();
            wr.write_all(&alert).unwrap();
            wr.done().unwrap();
        }
        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn large_message_spills_into_queue() {
        let mut cfg: Config = config();
        cfg.set_max_plain_out(8);

        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let message: [u8; 20] = core::array::from_fn(|i| i as u8);
        let mut wr = mps.write_start(ContentType::Handshake, epoch).unwrap();
        wr.write_all(&message).unwrap();
        wr.done().unwrap();
        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 3);
        let mut rejoined: Vec<u8> = Vec::new();
        for (ctype, payload) in &records {
            assert_eq!(*ctype, u8::from(ContentType::Handshake));
            assert!(payload.len() <= 8);
            rejoined.extend_from_slice(payload);
        }
        assert_eq!(rejoined, message);
    }

    #[test]
    fn non_pausable_type_does_not_spill() {
        let mut cfg: Config = config();
        cfg.set_max_plain_out(8);

        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> = RecordLayer::new(cfg, link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::ApplicationData, epoch).unwrap();
        assert_eq!(wr.write_all(&[0; 20]).unwrap_err(), Error::OutOfMemory);
        // partial writes still work
        assert_eq!(wr.write(&[1; 20]).unwrap(), 8);
        wr.done().unwrap();
        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, vec![1; 8]);
    }

    #[test]
    fn flush_retries_after_want_write() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.set_flush_errors(1);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::ApplicationData, epoch).unwrap();
        wr.write_all(b"data").unwrap();
        wr.done().unwrap();

        assert_eq!(mps.write_flush().unwrap_err(), Error::WantWrite);
        // the record itself was dispatched, only the flush is pending
        assert_eq!(split_records(mps.transport().dispatched()).len(), 1);
        mps.write_flush().unwrap();
        assert_eq!(mps.transport().flushed(), 9);
    }

    #[test]
    fn block_macro_retries_flush() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let mut link = RamLink::new(&mut rx, &mut tx);
        link.set_flush_errors(2);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::ApplicationData, epoch).unwrap();
        wr.write_all(b"data").unwrap();
        wr.done().unwrap();

        tls_mps::block!(mps.write_flush()).unwrap();
        assert_eq!(mps.transport().flushed(), 9);
    }

    #[test]
    fn dropped_writer_handle_revokes_bytes() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = mps.write_start(ContentType::ApplicationData, epoch).unwrap();
        wr.write_all(b"discarded").unwrap();
        drop(wr);

        let mut wr = mps.write_start(ContentType::ApplicationData, epoch).unwrap();
        wr.write_all(b"kept").unwrap();
        wr.done().unwrap();
        mps.write_flush().unwrap();

        let records = split_records(mps.transport().dispatched());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1, b"kept".to_vec());
    }

    #[test]
    fn unknown_type_and_epoch_rejected() {
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut mps: RecordLayer<_, Identity> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = mps.epoch_add(None).unwrap();
        mps.epoch_usage(epoch, EpochUsage::READ).unwrap();

        // change_cipher_spec was never registered
        assert_eq!(
            mps.write_start(ContentType::ChangeCipherSpec, epoch)
                .unwrap_err(),
            Error::InvalidArgs
        );
        // the epoch has no write permission
        assert_eq!(
            mps.write_start(ContentType::ApplicationData, epoch)
                .unwrap_err(),
            Error::InvalidArgs
        );
        // unknown epoch
        assert_eq!(
            mps.write_start(ContentType::ApplicationData, 7).unwrap_err(),
            Error::InvalidArgs
        );
    }
}

mod roundtrip {
    use super::*;

    fn init_log() {
        let _ = stderrlog::new().verbosity(4).init();
    }

    /// Everything written by one context is read back by its peer,
    /// through the XOR obfuscator so the transform path is exercised.
    #[test]
    fn write_then_read_back() {
        init_log();
        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut writer_mps: RecordLayer<_, Xor> =
            RecordLayer::new(config(), link, &mut acc, &mut queue);
        let epoch = writer_mps.epoch_add(Some(Xor::new(0x5A))).unwrap();
        writer_mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = writer_mps
            .write_start(ContentType::ApplicationData, epoch)
            .unwrap();
        wr.write_all(b"over the wire").unwrap();
        wr.done().unwrap();
        writer_mps.write_flush().unwrap();

        let wire: Vec<u8> = writer_mps.transport().dispatched().to_vec();
        log::debug!("wire bytes: {:02X?}", wire);
        // the payload is not plaintext on the wire
        assert_ne!(&wire[5..], b"over the wire");

        let mut rx2: [u8; 64] = [0; 64];
        let mut tx2: [u8; 16] = [0; 16];
        let mut link2 = RamLink::new(&mut rx2, &mut tx2);
        link2.feed_rx(&wire);

        let mut acc2: [u8; 64] = [0; 64];
        let mut queue2: [u8; 0] = [];
        let mut reader_mps: RecordLayer<_, Xor> =
            RecordLayer::new(config(), link2, &mut acc2, &mut queue2);
        let epoch = reader_mps.epoch_add(Some(Xor::new(0x5A))).unwrap();
        reader_mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut rd = reader_mps.read_start().unwrap();
        assert_eq!(rd.get_exact(13).unwrap(), b"over the wire");
        rd.commit();
        rd.done().unwrap();
    }

    /// HMAC-protected records survive the loop.
    #[test]
    fn hmac_protected_roundtrip() {
        init_log();
        let mut cfg: Config = config();
        cfg.set_max_plain_in(64);

        let mut rx: [u8; 16] = [0; 16];
        let mut tx: [u8; 256] = [0; 256];
        let link = RamLink::new(&mut rx, &mut tx);

        let mut acc: [u8; 64] = [0; 64];
        let mut queue: [u8; 64] = [0; 64];
        let mut writer_mps: RecordLayer<_, HmacSha256> =
            RecordLayer::new(cfg.clone(), link, &mut acc, &mut queue);
        let epoch = writer_mps
            .epoch_add(Some(HmacSha256::new(b"shared key")))
            .unwrap();
        writer_mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut wr = writer_mps
            .write_start(ContentType::ApplicationData, epoch)
            .unwrap();
        wr.write_all(b"authenticated").unwrap();
        wr.done().unwrap();
        writer_mps.write_flush().unwrap();

        let wire: Vec<u8> = writer_mps.transport().dispatched().to_vec();
        assert_eq!(wire.len(), 5 + 13 + HmacSha256::TAG_LEN);

        let mut rx2: [u8; 128] = [0; 128];
        let mut tx2: [u8; 16] = [0; 16];
        let mut link2 = RamLink::new(&mut rx2, &mut tx2);
        link2.feed_rx(&wire);

        let mut acc2: [u8; 64] = [0; 64];
        let mut queue2: [u8; 0] = [];
        let mut reader_mps: RecordLayer<_, HmacSha256> =
            RecordLayer::new(cfg, link2, &mut acc2, &mut queue2);
        let epoch = reader_mps
            .epoch_add(Some(HmacSha256::new(b"shared key")))
            .unwrap();
        reader_mps.epoch_usage(epoch, EpochUsage::READ_WRITE).unwrap();

        let mut rd = reader_mps.read_start().unwrap();
        assert_eq!(rd.get_exact(13).unwrap(), b"authenticated");
        rd.commit();
        rd.done().unwrap();
    }
}
