use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::arq::CtlEvent;
use crate::error::ModemError;
use crate::utils::consts::IAMALIVE_PERIOD_S;

fn event_to_line(event: &CtlEvent) -> String {
    match event {
        CtlEvent::Reply(text) => text.clone(),
        CtlEvent::PttOn => "PTT ON\r".to_string(),
        CtlEvent::PttOff => "PTT OFF\r".to_string(),
        CtlEvent::Connected {
            my_call,
            dst_call,
            bandwidth_hz,
        } => format!("CONNECTED {} {} {}\r", my_call, dst_call, *bandwidth_hz as u64),
        CtlEvent::Disconnected => "DISCONNECTED\r".to_string(),
    }
}

fn serve_control_client(
    mut stream: TcpStream,
    commands: &Sender<String>,
    events: &Receiver<CtlEvent>,
    shutdown: &AtomicBool,
) {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .ok();
    let mut pending = String::new();
    let mut byte = [0u8; 256];
    let mut last_alive = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        // Asynchronous events first, keep-alive on its minute cadence.
        while let Ok(event) = events.try_recv() {
            if stream.write_all(event_to_line(&event).as_bytes()).is_err() {
                return;
            }
        }
        if last_alive.elapsed().as_secs() >= IAMALIVE_PERIOD_S {
            last_alive = Instant::now();
            if stream.write_all(b"IAMALIVE\r").is_err() {
                return;
            }
        }

        match stream.read(&mut byte) {
            Ok(0) => return,
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&byte[..n]));
                while let Some(position) = pending.find('\r') {
                    let line = pending[..position].to_string();
                    pending = pending[position + 1..].to_string();
                    if commands.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(error)
                if error.kind() == ErrorKind::WouldBlock
                    || error.kind() == ErrorKind::TimedOut => {}
            Err(error) => {
                debug!(%error, "control client read failed");
                return;
            }
        }
    }
}

/// Line-oriented ASCII command surface. One client at a time.
pub fn spawn_control_surface(
    port: u16,
    commands: Sender<String>,
    events: Receiver<CtlEvent>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, ModemError> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "control surface listening");

    let handle = thread::Builder::new()
        .name("tcp-control".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        info!(%peer, "control client connected");
                        stream.set_nonblocking(false).ok();
                        // Stale events belong to nobody.
                        while events.try_recv().is_ok() {}
                        serve_control_client(stream, &commands, &events, &shutdown);
                        info!("control client disconnected");
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(100));
                    }
                    Err(error) => {
                        warn!(%error, "control accept failed");
                        thread::sleep(Duration::from_millis(500));
                    }
                }
            }
        })
        .expect("spawn tcp-control");
    Ok(handle)
}

fn serve_data_client(
    mut stream: TcpStream,
    data_in: &Sender<Vec<u8>>,
    data_out: &Receiver<Vec<u8>>,
    shutdown: &AtomicBool,
) {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .ok();
    let mut buffer = [0u8; 4096];

    while !shutdown.load(Ordering::Relaxed) {
        while let Ok(bytes) = data_out.try_recv() {
            if stream.write_all(&bytes).is_err() {
                return;
            }
        }

        match stream.read(&mut buffer) {
            Ok(0) => return,
            Ok(n) => {
                // Blocking send: the channel bound is the back-pressure.
                if data_in.send(buffer[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(error)
                if error.kind() == ErrorKind::WouldBlock
                    || error.kind() == ErrorKind::TimedOut => {}
            Err(error) => {
                debug!(%error, "data client read failed");
                return;
            }
        }
    }
}

/// Opaque byte-stream surface: client writes queue for transmission,
/// decoded payloads stream back as soon as frames arrive intact.
pub fn spawn_data_surface(
    port: u16,
    data_in: Sender<Vec<u8>>,
    data_out: Receiver<Vec<u8>>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, ModemError> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "data surface listening");

    let handle = thread::Builder::new()
        .name("tcp-data".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        info!(%peer, "data client connected");
                        stream.set_nonblocking(false).ok();
                        serve_data_client(stream, &data_in, &data_out, &shutdown);
                        info!("data client disconnected");
                    }
                    Err(error) if error.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(100));
                    }
                    Err(error) => {
                        warn!(%error, "data accept failed");
                        thread::sleep(Duration::from_millis(500));
                    }
                }
            }
        })
        .expect("spawn tcp-data");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::net::TcpStream;

    fn read_reply(stream: &mut TcpStream) -> String {
        let mut buffer = [0u8; 256];
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut collected = String::new();
        loop {
            match stream.read(&mut buffer) {
                Ok(n) if n > 0 => {
                    collected.push_str(&String::from_utf8_lossy(&buffer[..n]));
                    if collected.contains('\r') {
                        return collected;
                    }
                }
                _ => return collected,
            }
        }
    }

    #[test]
    fn control_surface_passes_commands_and_events() {
        let (commands_tx, commands_rx) = bounded::<String>(16);
        let (events_tx, events_rx) = bounded::<CtlEvent>(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        // Port 0 picks a free port; re-bind to learn it.
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let handle =
            spawn_control_surface(port, commands_tx, events_rx, shutdown.clone()).unwrap();
        thread::sleep(Duration::from_millis(100));

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(b"MYCALL AA1AA\r").unwrap();
        assert_eq!(commands_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "MYCALL AA1AA");

        events_tx.send(CtlEvent::Reply("OK\r".into())).unwrap();
        let reply = read_reply(&mut client);
        assert!(reply.contains("OK\r"), "{reply:?}");

        events_tx.send(CtlEvent::PttOn).unwrap();
        let event = read_reply(&mut client);
        assert!(event.contains("PTT ON\r"), "{event:?}");

        shutdown.store(true, Ordering::Relaxed);
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn data_surface_moves_bytes_both_ways() {
        let (in_tx, in_rx) = bounded::<Vec<u8>>(16);
        let (out_tx, out_rx) = bounded::<Vec<u8>>(16);
        let shutdown = Arc::new(AtomicBool::new(false));

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let handle = spawn_data_surface(port, in_tx, out_rx, shutdown.clone()).unwrap();
        thread::sleep(Duration::from_millis(100));

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        client.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(
            in_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            vec![1, 2, 3, 4]
        );

        out_tx.send(vec![9, 8, 7]).unwrap();
        let mut buffer = [0u8; 16];
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let n = client.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], &[9, 8, 7]);

        shutdown.store(true, Ordering::Relaxed);
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn event_lines_match_the_protocol() {
        assert_eq!(event_to_line(&CtlEvent::PttOff), "PTT OFF\r");
        assert_eq!(event_to_line(&CtlEvent::Disconnected), "DISCONNECTED\r");
        let connected = CtlEvent::Connected {
            my_call: "A".into(),
            dst_call: "B".into(),
            bandwidth_hz: 2500.0,
        };
        assert_eq!(event_to_line(&connected), "CONNECTED A B 2500\r");
    }
}
