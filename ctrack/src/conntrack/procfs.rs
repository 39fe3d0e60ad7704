use crate::conntrack::ConnectionSource;
use anyhow::{Context, Result};
use ctrack_common::CtrackErr;
use ctrack_common::types::Conn;
use log::{debug, trace};
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::net::IpAddr;
use std::path::PathBuf;

/// Reads the conntrack table in its procfs text form, e.g.
///
/// `ipv4 2 tcp 6 431999 ESTABLISHED src=10.0.0.5 dst=10.0.0.9 sport=43210 dport=443 packets=10 bytes=1200 src=10.0.0.9 dst=10.0.0.5 sport=443 dport=43210 packets=8 bytes=4000 [ASSURED] mark=0 use=2`
///
/// The `conntrack -L -o id` layout, without the family columns and with
/// a trailing `id=`, is understood as well.
pub struct ProcConntrack {
    path: PathBuf,
    /// Lowercase protocol names to keep, empty keeps all
    protocols: Vec<String>,
    /// Uppercase states to keep, empty keeps all
    states: Vec<String>,
}

impl ProcConntrack {
    pub fn new(path: PathBuf, protocols: &[String], states: &[String]) -> Self {
        Self {
            path,
            protocols: protocols.iter().map(|p| p.to_ascii_lowercase()).collect(),
            states: states.iter().map(|s| s.to_ascii_uppercase()).collect(),
        }
    }

    fn wanted(&self, conn: &Conn) -> bool {
        (self.protocols.is_empty() || self.protocols.contains(&conn.protocol))
            && (self.states.is_empty() || self.states.contains(&conn.state))
    }
}

impl ConnectionSource for ProcConntrack {
    fn list(&self) -> Result<Vec<Conn>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open conntrack table {}", self.path.display()))?;

        let mut conns = Vec::new();
        let mut skipped = 0usize;

        for line in BufReader::new(file).lines() {
            let line = line
                .with_context(|| format!("Failed to read conntrack table {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(&line) {
                Ok(conn) if self.wanted(&conn) => conns.push(conn),
                Ok(_) => {}
                Err(e) => {
                    trace!("Skipping conntrack line '{}': {}", line, e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            debug!("Skipped {} unparsable conntrack entries", skipped);
        }

        Ok(conns)
    }
}

#[derive(Debug, Default)]
struct Tuple {
    src: Option<IpAddr>,
    dst: Option<IpAddr>,
    sport: Option<u16>,
    dport: Option<u16>,
    bytes: Option<u64>,
}

/// Parses one conntrack table line. The first address tuple is the
/// origin direction, the second the reply direction
pub fn parse_line(line: &str) -> Result<Conn, CtrackErr> {
    let mut protocol: Option<&str> = None;
    let mut state: Option<&str> = None;
    let mut origin = Tuple::default();
    let mut reply = Tuple::default();
    let mut in_reply = false;
    let mut seen_fields = false;
    let mut ids = Vec::new();

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            if seen_fields || token.starts_with('[') || token.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if token == "ipv4" || token == "ipv6" {
                continue;
            }
            if protocol.is_none() {
                protocol = Some(token);
            } else if state.is_none() {
                state = Some(token);
            }
            continue;
        };

        seen_fields = true;
        if key == "src" && origin.src.is_some() {
            in_reply = true;
        }
        let tuple = if in_reply { &mut reply } else { &mut origin };

        match key {
            "src" => tuple.src = value.parse().ok(),
            "dst" => tuple.dst = value.parse().ok(),
            "sport" => tuple.sport = value.parse().ok(),
            "dport" => tuple.dport = value.parse().ok(),
            "bytes" => tuple.bytes = value.parse().ok(),
            "id" => ids.push(value),
            _ => {}
        }
    }

    let protocol = protocol
        .ok_or(CtrackErr::MalformedConn("no protocol"))?
        .to_ascii_lowercase();
    let origin_ip = origin.src.ok_or(CtrackErr::MalformedConn("no origin src"))?;
    let dest_ip = origin.dst.ok_or(CtrackErr::MalformedConn("no origin dst"))?;
    let origin_port = origin.sport.unwrap_or(0);
    let dest_port = origin.dport.unwrap_or(0);

    // icmp tuples carry an id= of their own in both directions,
    // an odd count means the last one is the conntrack id
    let id = match ids.len() % 2 {
        1 => ids
            .last()
            .and_then(|id| id.parse().ok())
            .ok_or(CtrackErr::MalformedConn("bad id"))?,
        _ => synthetic_id(&protocol, origin_ip, origin_port, dest_ip, dest_port),
    };

    Ok(Conn {
        id,
        origin_ip,
        origin_port,
        dest_ip,
        dest_port,
        protocol,
        state: state.map(str::to_ascii_uppercase).unwrap_or_default(),
        // accounting disabled leaves both counters out
        origin_bytes: origin.bytes.unwrap_or(0),
        reply_bytes: reply.bytes.unwrap_or(0),
    })
}

/// Stable id for tables which do not expose one, derived from the
/// origin tuple so the same entry maps to the same id every scrape.
/// Kept at the full hash width, a narrower id collides between live
/// entries of a busy node
fn synthetic_id(protocol: &str, src: IpAddr, sport: u16, dst: IpAddr, dport: u16) -> u64 {
    let mut hasher = DefaultHasher::new();
    (protocol, src, sport, dst, dport).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TCP: &str = "ipv4     2 tcp      6 431999 ESTABLISHED src=10.10.1.2 dst=192.168.50.4 sport=33404 dport=2375 packets=10 bytes=1200 src=192.168.50.4 dst=10.10.1.2 sport=2375 dport=33404 packets=8 bytes=4000 [ASSURED] mark=0 zone=0 use=2";

    #[test]
    fn parses_procfs_tcp_line() {
        let conn = parse_line(TCP).unwrap();

        assert_eq!(conn.protocol, "tcp");
        assert_eq!(conn.state, "ESTABLISHED");
        assert_eq!(conn.origin_ip, "10.10.1.2".parse::<IpAddr>().unwrap());
        assert_eq!(conn.origin_port, 33404);
        assert_eq!(conn.dest_ip, "192.168.50.4".parse::<IpAddr>().unwrap());
        assert_eq!(conn.dest_port, 2375);
        assert_eq!(conn.origin_bytes, 1200);
        assert_eq!(conn.reply_bytes, 4000);
    }

    #[test]
    fn synthetic_id_is_stable_per_origin_tuple() {
        let a = parse_line(TCP).unwrap();
        let b = parse_line(TCP).unwrap();
        assert_eq!(a.id, b.id);

        let other = parse_line(&TCP.replace("sport=33404 dport=2375", "sport=33405 dport=2375")).unwrap();
        assert_ne!(a.id, other.id);
    }

    #[test]
    fn neighbouring_tuples_get_distinct_ids() {
        let line = |sport: u16| {
            format!(
                "ipv4 2 tcp 6 431999 ESTABLISHED src=192.168.50.0 dst=10.10.1.2 sport={sport} dport=443 packets=1 bytes=1000 src=10.10.1.2 dst=192.168.50.0 sport=443 dport={sport} packets=1 bytes=10 [ASSURED] mark=0 use=2"
            )
        };

        let a = parse_line(&line(12121)).unwrap();
        let b = parse_line(&line(15211)).unwrap();
        assert_ne!(a.id, b.id);

        let ids: std::collections::HashSet<u64> = (1024..u16::MAX)
            .map(|sport| parse_line(&line(sport)).unwrap().id)
            .collect();
        assert_eq!(ids.len(), usize::from(u16::MAX - 1024));
    }

    #[test]
    fn parses_conntrack_tool_layout_with_id() {
        let line = "tcp      6 118 SYN_SENT src=10.0.0.5 dst=1.1.1.1 sport=51000 dport=443 [UNREPLIED] src=1.1.1.1 dst=10.0.0.5 sport=443 dport=51000 mark=0 use=1 id=3735928559";
        let conn = parse_line(line).unwrap();

        assert_eq!(conn.id, 3735928559);
        assert_eq!(conn.state, "SYN_SENT");
        assert_eq!(conn.origin_bytes, 0);
        assert_eq!(conn.reply_bytes, 0);
    }

    #[test]
    fn udp_has_no_state() {
        let line = "ipv4     2 udp      17 28 src=10.0.0.5 dst=10.0.0.2 sport=41000 dport=53 src=10.0.0.2 dst=10.0.0.5 sport=53 dport=41000 mark=0 use=2";
        let conn = parse_line(line).unwrap();

        assert_eq!(conn.protocol, "udp");
        assert_eq!(conn.state, "");
        assert_eq!(conn.dest_port, 53);
    }

    #[test]
    fn icmp_tuple_ids_are_not_conntrack_ids() {
        let plain = "ipv4 2 icmp 1 29 src=10.0.0.5 dst=8.8.8.8 type=8 code=0 id=77 src=8.8.8.8 dst=10.0.0.5 type=0 code=0 id=77 mark=0 use=2";
        let with_id = format!("{plain} id=42");

        assert_ne!(parse_line(plain).unwrap().id, 77);
        assert_eq!(parse_line(&with_id).unwrap().id, 42);
    }

    #[test]
    fn rejects_lines_without_addresses() {
        assert!(parse_line("ipv4 2 tcp 6 10 ESTABLISHED").is_err());
        assert!(parse_line("garbage").is_err());
        assert!(parse_line("").is_err());
    }

    #[test]
    fn list_filters_and_skips_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{TCP}").unwrap();
        writeln!(file, "this is not conntrack").unwrap();
        writeln!(
            file,
            "ipv4 2 tcp 6 100 TIME_WAIT src=10.0.0.5 dst=10.0.0.6 sport=1 dport=2 src=10.0.0.6 dst=10.0.0.5 sport=2 dport=1 mark=0 use=1"
        )
        .unwrap();
        writeln!(
            file,
            "ipv4 2 udp 17 28 src=10.0.0.5 dst=10.0.0.2 sport=41000 dport=53 src=10.0.0.2 dst=10.0.0.5 sport=53 dport=41000 mark=0 use=2"
        )
        .unwrap();
        writeln!(file).unwrap();

        let source = ProcConntrack::new(
            file.path().to_path_buf(),
            &["TCP".to_string()],
            &["established".to_string(), "syn_sent".to_string()],
        );
        let conns = source.list().unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].dest_port, 2375);

        let everything = ProcConntrack::new(file.path().to_path_buf(), &[], &[]);
        assert_eq!(everything.list().unwrap().len(), 3);
    }

    #[test]
    fn missing_table_is_an_error() {
        let source = ProcConntrack::new("/nonexistent/nf_conntrack".into(), &[], &[]);
        assert!(source.list().is_err());
    }
}
