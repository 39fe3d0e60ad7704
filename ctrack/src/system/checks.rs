use anyhow::Result;
use log::{debug, warn};
use sysctl::Sysctl;

const CONNTRACK_ACCT: &str = "net.netfilter.nf_conntrack_acct";

/// Warns when the kernel does not account bytes per conntrack entry,
/// in which case every byte counter stays at zero
pub fn check_conntrack_accounting() -> Result<()> {
    let ctl = sysctl::Ctl::new(CONNTRACK_ACCT)?;
    let value = ctl.value_string()?;

    if accounting_disabled(&value) {
        warn!(
            "Conntrack byte accounting is disabled, byte counters will stay at zero.\n\
             \n\
             Enable it with:\n\
             sudo sysctl -w {}=1",
            CONNTRACK_ACCT
        );
    } else {
        debug!("Conntrack byte accounting is enabled");
    }

    Ok(())
}

fn accounting_disabled(value: &str) -> bool {
    value.trim() == "0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_means_disabled() {
        assert!(accounting_disabled("0"));
        assert!(accounting_disabled("0\n"));
        assert!(!accounting_disabled("1"));
    }
}
