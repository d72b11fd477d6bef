use crate::error::Result;
use crate::structs::*;
use crate::ui::Stats;

use crossbeam_channel::Receiver;
use pcap_file::pcap::{PcapPacket, PcapWriter};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::sync::Arc;

/// Runs the pcap export thread.
///
/// The packet batches are written in the order they are received, which is the generation
/// order. The output file is created or truncated.
pub fn run_export(rx_pcap: Receiver<Packets>, outfile: String, stats: Arc<Stats>) -> Result<()> {
    log::trace!("Start pcap export thread");
    let file_out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&outfile)?;
    let mut pcap_writer = PcapWriter::new(BufWriter::new(file_out))?;
    log::trace!("Saving into {}", &outfile);

    while let Ok(packets) = rx_pcap.recv() {
        write_packets(&mut pcap_writer, &packets)?;
        stats.increase_pcap(packets.len() as u64);
    }

    pcap_writer.into_writer().flush()?;
    log::trace!("Pcap export thread done");
    Ok(())
}

fn write_packets<W: Write>(pcap_writer: &mut PcapWriter<W>, packets: &Packets) -> Result<()> {
    for packet in packets.packets.iter() {
        pcap_writer.write_packet(&PcapPacket::new(
            packet.timestamp,
            packet.data.len() as u32,
            &packet.data,
        ))?;
    }
    Ok(())
}
