use itersim::error::Error;
use itersim::frame::{Bit, Real};
use itersim::module::{Channel, Decoder, Encoder, Modem, Module, PortContract, Role};
use itersim::stages::{BpskModem, Filter, RepetitionDecoder, RepetitionEncoder};

/// Modem with only the plain transforms.
struct PlainModem {
    n: usize,
}

impl Module for PlainModem {
    fn name(&self) -> &str {
        "PlainModem"
    }
    fn role(&self) -> Role {
        Role::Modulator
    }
    fn contract(&self) -> PortContract {
        PortContract::new(self.n, self.n, 2)
    }
}

impl Modem for PlainModem {
    fn modulate_frame(&mut self, bits: &[Bit], symbols: &mut [Real], _frame: usize) -> Result<(), Error> {
        for (s, &b) in symbols.iter_mut().zip(bits) {
            *s = if b == 0 { 1.0 } else { -1.0 };
        }
        Ok(())
    }
}

#[test]
fn batch_size_checked_on_every_port() {
    let mut enc = RepetitionEncoder::new(4, 2, 3);
    let err = enc.encode(&[0; 11], &mut [0; 24]).unwrap_err();
    assert_eq!(
        err,
        Error::SizeMismatch {
            module: "RepetitionEncoder".into(),
            port: "input",
            per_frame: 4,
            batch_width: 3,
            expected: 12,
            actual: 11,
        }
    );
    assert!(enc.encode(&[0; 12], &mut [0; 24]).is_ok());
}

#[test]
fn missing_variant_is_unimplemented() {
    let mut modem = PlainModem { n: 2 };
    let mut symbols = [0.0; 4];
    modem.modulate(&[0, 1, 1, 0], &mut symbols).unwrap();
    assert_eq!(symbols, [1.0, -1.0, -1.0, 1.0]);

    let err = modem
        .demodulate_with_gains(&[0.0; 4], &[1.0; 4], &mut [0.0; 4])
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnimplementedOperation {
            module: "PlainModem".into(),
            operation: "demodulate_with_gains",
        }
    );
}

#[test]
fn identity_filter_leaves_values_bitwise_unchanged() {
    let mut modem = BpskModem::new(4, 2);
    let received: [Real; 8] = [0.1, -2.5, 3.75, f32::MIN_POSITIVE, -0.0, 1e-30, 7.0, -7.0];
    let mut filtered = [9.0; 8];
    modem.filter(&received, &mut filtered).unwrap();
    for (a, b) in received.iter().zip(&filtered) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
}

#[test]
fn scaling_filter_runs_the_kernel() {
    let mut modem = BpskModem::new(2, 2).with_filter(Filter::Scale(0.5));
    let mut filtered = [0.0; 4];
    modem.filter(&[2.0, -4.0, 1.0, 8.0], &mut filtered).unwrap();
    assert_eq!(filtered, [1.0, -2.0, 0.5, 4.0]);
}

#[test]
fn masked_frames_keep_their_output() {
    let mut dec = RepetitionDecoder::new(2, 2, 3);
    let llrs = [-1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, -1.0, -1.0, -1.0, -1.0];
    let mut decoded = [7; 6];
    dec.decode_siho(&llrs, &mut decoded, Some(&[true, false, true])).unwrap();
    assert_eq!(decoded, [1, 0, 7, 7, 1, 1]);
}

#[test]
fn mask_of_wrong_length_rejected() {
    let mut dec = RepetitionDecoder::new(2, 2, 3);
    let err = dec
        .decode_siso(&[0.0; 12], &mut [0.0; 12], Some(&[true, true]))
        .unwrap_err();
    assert!(matches!(err, Error::SizeMismatch { port: "active", expected: 3, actual: 2, .. }));
}

struct PlainChannel;

impl Module for PlainChannel {
    fn name(&self) -> &str {
        "PlainChannel"
    }
    fn role(&self) -> Role {
        Role::Channel
    }
    fn contract(&self) -> PortContract {
        PortContract::new(2, 2, 1)
    }
}

impl Channel for PlainChannel {
    fn add_noise_frame(&mut self, sent: &[Real], received: &mut [Real], _frame: usize) -> Result<(), Error> {
        received.copy_from_slice(sent);
        Ok(())
    }
}

#[test]
fn channel_without_gains() {
    let mut chn = PlainChannel;
    assert!(!chn.provides_gains());
    let err = chn
        .add_noise_with_gains(&[1.0, -1.0], &mut [0.0; 2], &mut [0.0; 2])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::UnimplementedOperation { operation: "add_noise_with_gains", .. }
    ));
}
