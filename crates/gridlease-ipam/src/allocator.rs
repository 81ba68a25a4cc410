//! Host-id allocation over a single node subnet.

use std::collections::BTreeSet;

use gridlease_core::subnet::{FIRST_HOST_ID, LAST_HOST_ID, host_id};
use gridlease_core::{PrivateIp, Subnet};
use tracing::{debug, warn};

use crate::error::{IpamError, IpamResult};

/// Fill the private IP of every unassigned item inside `subnet`.
///
/// Items whose IP lies inside the subnet keep it and reserve its host id. A
/// later item pinned to a host id an earlier item already pinned is treated
/// as unassigned. Items with an empty IP, or one outside the subnet, receive the lowest free
/// host id starting at `.2`; the scan cursor never moves back, so addresses
/// are handed out in item order. `used` gains every reserved and assigned
/// host id on success. On failure neither `used` nor any item is touched.
pub fn assign_ips<T: PrivateIp>(
    subnet: &Subnet,
    used: &mut BTreeSet<u8>,
    items: &mut [T],
) -> IpamResult<()> {
    if items.is_empty() {
        return Ok(());
    }

    let mut taken = used.clone();
    let mut pinned = BTreeSet::new();
    let mut pending = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let ip = item.private_ip();
        match host_id(ip) {
            Some(host) if subnet.contains_str(ip) && pinned.insert(host) => {
                taken.insert(host);
            }
            Some(_) if subnet.contains_str(ip) => {
                warn!(%subnet, %ip, "private ip pinned twice, reassigning");
                pending.push(idx);
            }
            _ => pending.push(idx),
        }
    }

    let mut assignments = Vec::with_capacity(pending.len());
    let mut cursor = FIRST_HOST_ID;
    for idx in pending {
        while taken.contains(&cursor) {
            if cursor == LAST_HOST_ID {
                warn!(%subnet, "address pool exhausted");
                return Err(IpamError::AddressPoolExhausted {
                    subnet: subnet.to_string(),
                });
            }
            cursor += 1;
        }
        taken.insert(cursor);
        assignments.push((idx, subnet.host(cursor)));
    }

    for (idx, ip) in assignments {
        debug!(%subnet, %ip, "private ip assigned");
        items[idx].set_private_ip(ip.to_string());
    }
    *used = taken;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlease_core::Vm;

    fn subnet() -> Subnet {
        "10.1.0.0/24".parse().unwrap()
    }

    fn make_vm(name: &str, ip: &str) -> Vm {
        Vm {
            name: name.to_string(),
            ip: ip.to_string(),
            ..Default::default()
        }
    }

    fn ips(vms: &[Vm]) -> Vec<&str> {
        vms.iter().map(|vm| vm.ip.as_str()).collect()
    }

    #[test]
    fn assigns_in_order_from_first_host() {
        let mut used = BTreeSet::new();
        let mut vms = vec![make_vm("a", ""), make_vm("b", "")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.2", "10.1.0.3"]);
        assert_eq!(used, BTreeSet::from([2, 3]));
    }

    #[test]
    fn skips_used_and_pinned_addresses() {
        let mut used = BTreeSet::from([2, 3]);
        let mut vms = vec![make_vm("a", ""), make_vm("b", "10.1.0.5")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.4", "10.1.0.5"]);
        assert_eq!(used, BTreeSet::from([2, 3, 4, 5]));
    }

    #[test]
    fn pinned_address_is_reserved_before_scanning() {
        let mut used = BTreeSet::new();
        let mut vms = vec![make_vm("a", ""), make_vm("b", "10.1.0.2")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.3", "10.1.0.2"]);
    }

    #[test]
    fn duplicate_pin_is_reassigned() {
        let mut used = BTreeSet::new();
        let mut vms = vec![make_vm("a", "10.1.0.5"), make_vm("b", "10.1.0.5")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.5", "10.1.0.2"]);
        assert_eq!(used, BTreeSet::from([2, 5]));
    }

    #[test]
    fn address_outside_subnet_is_replaced() {
        let mut used = BTreeSet::new();
        let mut vms = vec![make_vm("a", "10.9.0.7")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.2"]);
    }

    #[test]
    fn exhaustion_leaves_inputs_untouched() {
        let mut used: BTreeSet<u8> = (FIRST_HOST_ID..LAST_HOST_ID).collect();
        let mut vms = vec![make_vm("a", ""), make_vm("b", "")];
        let before = used.clone();

        let err = assign_ips(&subnet(), &mut used, &mut vms).unwrap_err();

        assert_eq!(
            err,
            IpamError::AddressPoolExhausted {
                subnet: "10.1.0.0/24".to_string()
            }
        );
        assert_eq!(used, before);
        assert_eq!(ips(&vms), vec!["", ""]);
    }

    #[test]
    fn last_host_is_assignable() {
        let mut used: BTreeSet<u8> = (FIRST_HOST_ID..LAST_HOST_ID).collect();
        let mut vms = vec![make_vm("a", "")];

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(ips(&vms), vec!["10.1.0.254"]);
    }

    #[test]
    fn empty_list_is_noop() {
        let mut used = BTreeSet::from([7]);
        let mut vms: Vec<Vm> = Vec::new();

        assign_ips(&subnet(), &mut used, &mut vms).unwrap();

        assert_eq!(used, BTreeSet::from([7]));
    }
}
