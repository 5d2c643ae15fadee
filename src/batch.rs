//! Merges address-contiguous accesses of the same class into single transactions.

use tokio_modbus::{Address, Quantity};

use crate::access::{ByteOrder, Direction, FormatAtom, RegisterDescriptor, RegisterKind};

/// Accesses only share a transaction when all three of these agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct AccessClass {
    kind: RegisterKind,
    direction: Direction,
    order: ByteOrder,
}

impl AccessClass {
    fn of(descriptor: &RegisterDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            direction: descriptor.direction,
            order: descriptor.format.order(),
        }
    }
}

/// A run of same-class accesses executed as one request.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessGroup {
    pub kind: RegisterKind,
    pub direction: Direction,
    pub order: ByteOrder,
    pub start_address: Address,
    pub register_count: Quantity,
    members: Vec<RegisterDescriptor>,
}

impl AccessGroup {
    pub fn members(&self) -> &[RegisterDescriptor] {
        &self.members
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.label.as_str())
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.members.iter().map(|m| m.address)
    }

    /// Format atoms of all members, concatenated in member order.
    pub fn atoms(&self) -> Vec<FormatAtom> {
        self.members
            .iter()
            .flat_map(|m| m.format.atoms().iter().copied())
            .collect()
    }

    /// Write literals, index-aligned with the members.
    pub fn values(&self) -> impl Iterator<Item = Option<&str>> {
        self.members.iter().map(|m| m.value.as_deref())
    }
}

struct GroupBuilder {
    class: AccessClass,
    start_address: Address,
    register_count: u32,
    members: Vec<RegisterDescriptor>,
}

impl GroupBuilder {
    fn new(first: RegisterDescriptor) -> Self {
        Self {
            class: AccessClass::of(&first),
            start_address: first.address,
            register_count: first.size().into(),
            members: vec![first],
        }
    }

    /// Strict adjacency: the next access must start exactly where this run ends.
    fn accepts(&self, next: &RegisterDescriptor) -> bool {
        u32::from(self.start_address) + self.register_count == u32::from(next.address)
    }

    fn push(&mut self, next: RegisterDescriptor) {
        self.register_count += u32::from(next.size());
        self.members.push(next);
    }

    fn finish(self) -> AccessGroup {
        AccessGroup {
            kind: self.class.kind,
            direction: self.class.direction,
            order: self.class.order,
            start_address: self.start_address,
            // A run never extends past the last address so this fits.
            register_count: self.register_count as Quantity,
            members: self.members,
        }
    }
}

/// Groups descriptors into transactions.
///
/// Classes appear in the order they were first seen; within a class groups are
/// ordered by start address. Descriptors at the same address never merge.
pub fn group(descriptors: Vec<RegisterDescriptor>) -> Vec<AccessGroup> {
    let mut classes: Vec<(AccessClass, Vec<RegisterDescriptor>)> = Vec::new();
    for descriptor in descriptors {
        let class = AccessClass::of(&descriptor);
        match classes.iter_mut().find(|(c, _)| *c == class) {
            Some((_, members)) => members.push(descriptor),
            None => classes.push((class, vec![descriptor])),
        }
    }

    let mut groups = Vec::new();
    for (_, mut members) in classes {
        members.sort_by_key(|d| d.address);
        let mut current: Option<GroupBuilder> = None;
        for descriptor in members {
            match current.as_mut() {
                Some(builder) if builder.accepts(&descriptor) => builder.push(descriptor),
                _ => {
                    if let Some(done) = current.replace(GroupBuilder::new(descriptor)) {
                        groups.push(done.finish());
                    }
                }
            }
        }
        groups.extend(current.map(GroupBuilder::finish));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::parse_access;
    use std::collections::HashMap;

    fn descriptors(tokens: &[&str]) -> Vec<RegisterDescriptor> {
        let names = HashMap::new();
        tokens
            .iter()
            .map(|t| parse_access(t, &names).unwrap())
            .collect()
    }

    fn spans(groups: &[AccessGroup]) -> Vec<(Address, Quantity)> {
        groups
            .iter()
            .map(|g| (g.start_address, g.register_count))
            .collect()
    }

    #[test]
    fn adjacent_registers_merge() {
        let groups = group(descriptors(&["100", "101"]));
        assert_eq!(spans(&groups), vec![(100, 2)]);
        assert_eq!(groups[0].labels().collect::<Vec<_>>(), vec!["100", "101"]);
    }

    #[test]
    fn gaps_split_groups() {
        let groups = group(descriptors(&["100", "105"]));
        assert_eq!(spans(&groups), vec![(100, 1), (105, 1)]);
    }

    #[test]
    fn multi_register_formats_extend_the_run() {
        let groups = group(descriptors(&["h10/f", "h12", "h13/I", "h16"]));
        assert_eq!(spans(&groups), vec![(10, 5), (16, 1)]);
        assert_eq!(groups[0].atoms().len(), 3);
        assert_eq!(
            groups[0].addresses().collect::<Vec<_>>(),
            vec![10, 12, 13]
        );
    }

    #[test]
    fn same_address_never_merges() {
        for tokens in [["100", "100"], ["100/H", "100"]] {
            let groups = group(descriptors(&tokens));
            assert_eq!(spans(&groups), vec![(100, 1), (100, 1)]);
        }
    }

    #[test]
    fn sorts_within_a_class() {
        let groups = group(descriptors(&["102", "100", "101"]));
        assert_eq!(spans(&groups), vec![(100, 3)]);
        assert_eq!(
            groups[0].labels().collect::<Vec<_>>(),
            vec!["100", "101", "102"]
        );
    }

    #[test]
    fn classes_keep_first_seen_order_and_never_mix() {
        let groups = group(descriptors(&[
            "h5=1", "c5", "h5", "c6", "h6=2", "h6", "c4=1",
        ]));
        let shapes: Vec<_> = groups
            .iter()
            .map(|g| (g.kind, g.direction, g.start_address, g.register_count))
            .collect();
        assert_eq!(
            shapes,
            vec![
                (RegisterKind::HoldingRegister, Direction::Write, 5, 2),
                (RegisterKind::Coil, Direction::Read, 5, 2),
                (RegisterKind::HoldingRegister, Direction::Read, 5, 2),
                (RegisterKind::Coil, Direction::Write, 4, 1),
            ]
        );
        assert_eq!(groups[0].values().collect::<Vec<_>>(), vec![Some("1"), Some("2")]);
    }

    #[test]
    fn byte_order_splits_classes() {
        let groups = group(descriptors(&["h1/<H", "h2/>H"]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].order, ByteOrder::Little);
    }

    #[test]
    fn bits_merge_on_consecutive_addresses() {
        let groups = group(descriptors(&["d1", "d2", "d3", "d5"]));
        assert_eq!(spans(&groups), vec![(1, 3), (5, 1)]);
    }

    #[test]
    fn run_ending_at_the_top_address_does_not_overflow() {
        let groups = group(descriptors(&["65535", "0"]));
        assert_eq!(spans(&groups), vec![(0, 1), (65535, 1)]);
    }
}
