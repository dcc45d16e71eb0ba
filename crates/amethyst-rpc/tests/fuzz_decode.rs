use amethyst_rpc::envelope::{decode_payload, encode_payload, CallFrame, Envelope};
use amethyst_rpc::{Matrix4x4, TrackerRole, TrackerUpdate, Vector3};
use rand::{thread_rng, Rng};

#[test]
fn fuzz_decode_envelope_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = Envelope::decode(&data);
    }
}

#[test]
fn fuzz_decode_tracker_batches_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = decode_payload::<Vec<TrackerUpdate>>(&data);
        let _ = decode_payload::<Matrix4x4>(&data);
    }
}

#[test]
fn random_mutation_of_valid_call_is_handled() {
    let mut rng = thread_rng();
    let update = TrackerUpdate::new(TrackerRole::Waist)
        .with_velocity(Vector3::new(1.0, 2.0, 3.0), Vector3::ZERO);
    let call = Envelope::Call(CallFrame {
        call_id: 17,
        method: "UpdateTrackerList".into(),
        want_reply: false,
        args: encode_payload(&vec![update]).unwrap(),
    });
    let valid = call.encode().unwrap();

    for _ in 0..2_000 {
        let mut mutated = valid.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        if let Ok(Envelope::Call(frame)) = Envelope::decode(&mutated) {
            let _ = decode_payload::<Vec<TrackerUpdate>>(&frame.args);
        }
    }
}
