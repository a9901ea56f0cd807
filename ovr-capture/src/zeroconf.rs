//! Periodic UDP advertisement of the capture server, so tools can find targets without
//! knowing their address.

use std::io;
use std::net::{Ipv4Addr, UdpSocket};
use log::{debug, trace, warn};
use ovr_capture_core::headers::ZeroConfigPacket;
use crate::config::ZeroConfigSettings;
use crate::thread::Task;

pub(crate) struct ZeroConfigHost {
    task: Task,
}

impl ZeroConfigHost {
    pub fn start(settings: &ZeroConfigSettings, tcp_port: u16, package_name: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_broadcast(true)?;

        let packet = ZeroConfigPacket::new(tcp_port, package_name).to_bytes();
        let target = (settings.target, settings.port);
        let interval = settings.interval;
        debug!("[capture] Advertising port {} to {}:{}", tcp_port, target.0, target.1);

        let task = Task::spawn("capture-zeroconf", move |quit| {
            let mut warned = false;
            loop {
                match socket.send_to(&packet, target) {
                    Ok(_) => trace!("[capture] Zero-config packet sent"),
                    // no network yet is common on devices, complain only once
                    Err(e) if !warned => {
                        warn!("[capture] Zero-config broadcast failed: {}", e);
                        warned = true;
                    }
                    Err(_) => {}
                }
                if quit.wait_timeout(interval) {
                    break;
                }
            }
        })?;

        Ok(Self { task })
    }

    pub fn quit_and_wait(&mut self) {
        self.task.quit_and_wait();
    }
}
