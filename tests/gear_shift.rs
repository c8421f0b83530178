//! Adaptive mode negotiation: the session starts in the robust mode, the
//! TEST_CONNECTION exchange measures both directions, and SET_CONFIG hops
//! the pair to the SNR-appropriate mode before data flows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mercury::arq::{ArqConfig, CtlEvent};
use mercury::io::audio::LoopbackChannel;
use mercury::modem::Modem;
use mercury::phy::{Bandwidth, ConfigId, TelecomConfig};

const SYMBOL_SAMPLES: usize = 1088;

#[test]
fn gear_shift_negotiates_a_faster_mode_and_delivers() {
    let arq = ArqConfig {
        data_batch_size: 5,
        switch_role_timeout_ms: 60_000,
        gear_shift_on: true,
        ..ArqConfig::default()
    };

    let (station_a, handles_a) = Modem::start(
        TelecomConfig::default(),
        Bandwidth::Bw2500,
        ConfigId::Config0,
        arq.clone(),
    )
    .unwrap();
    let (station_b, handles_b) = Modem::start(
        TelecomConfig::default(),
        Bandwidth::Bw2500,
        ConfigId::Config0,
        arq,
    )
    .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let mut pumps = Vec::new();
    for (seed, from, to) in [
        (3u64, station_a.audio.clone(), station_b.audio.clone()),
        (5u64, station_b.audio.clone(), station_a.audio.clone()),
    ] {
        let stop = stop.clone();
        pumps.push(thread::spawn(move || {
            // Noise sized so the measured SNR lands in the middle modes.
            let mut channel = LoopbackChannel::new(SYMBOL_SAMPLES, 0.5, 2e-2, seed);
            while !stop.load(Ordering::Relaxed) {
                channel.pump_block(&from.playback, &to.capture);
                thread::sleep(Duration::from_millis(10));
            }
        }));
    }

    handles_b.commands.send("MYCALL GW-B".to_string()).unwrap();
    handles_b.commands.send("LISTEN ON".to_string()).unwrap();
    handles_a
        .commands
        .send("CONNECT GW-A GW-B".to_string())
        .unwrap();

    // CONNECTED arrives only after the SET_CONFIG negotiation settles.
    let deadline = Instant::now() + Duration::from_secs(240);
    let mut connected = false;
    while Instant::now() < deadline {
        if let Ok(CtlEvent::Connected { .. }) =
            handles_a.ctl_events.recv_timeout(Duration::from_millis(200))
        {
            connected = true;
            break;
        }
    }
    assert!(connected, "negotiation never completed");

    // A clean channel measures well above the Config0 band.
    let mode_a = station_a.telecom.lock().unwrap().current_configuration;
    let mode_b = station_b.telecom.lock().unwrap().current_configuration;
    assert_eq!(mode_a, mode_b, "stations disagree on the mode");
    assert!(
        mode_a > ConfigId::Config0,
        "gear shift never left the robust mode: {mode_a:?}"
    );

    // Data still flows in the negotiated mode.
    let payload: Vec<u8> = (0..600u32).map(|i| (i * 7 % 256) as u8).collect();
    handles_a.data_in.send(payload.clone()).unwrap();

    let mut delivered = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(240);
    while delivered.len() < payload.len() && Instant::now() < deadline {
        if let Ok(chunk) = handles_b.data_out.recv_timeout(Duration::from_millis(200)) {
            delivered.extend_from_slice(&chunk);
        }
    }
    assert_eq!(delivered, payload, "payload did not survive the mode hop");

    stop.store(true, Ordering::Relaxed);
    station_a.stop();
    station_b.stop();
    for pump in pumps {
        let _ = pump.join();
    }
}
