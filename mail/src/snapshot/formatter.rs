use mail_parser::{Addr, Address, Group};

/// Formats an address header value for display.
///
/// Formatting rules for a single address:
/// 1. Name AND Address -> "Name <Address>"
/// 2. Name -> "Name"
/// 3. Address -> "<Address>"
/// 4. Neither -> omitted
///
/// Groups render as "Group <members>". Entries are joined with ", " and an empty result is [`None`].
///
pub(crate) fn format_address(address: &Address) -> Option<String> {
    match address {
        Address::List(addrs) => format_addrs(addrs),
        Address::Group(groups) => join(groups.iter().filter_map(format_group)),
    }
}

fn format_addrs(addrs: &[Addr]) -> Option<String> {
    join(addrs.iter().filter_map(format_addr))
}

fn format_addr(addr: &Addr) -> Option<String> {
    name_address(addr.name.as_deref(), addr.address.as_deref().map(str::to_string))
}

fn format_group(group: &Group) -> Option<String> {
    name_address(group.name.as_deref(), format_addrs(&group.addresses))
}

fn name_address(name: Option<&str>, address: Option<String>) -> Option<String> {
    let name = name.filter(|name| !name.is_empty());
    let address = address.filter(|address| !address.is_empty());
    match (name, address) {
        (Some(name), Some(address)) => Some(format!("{} <{}>", name, address)),
        (Some(name), None) => Some(name.to_string()),
        (None, Some(address)) => Some(format!("<{}>", address)),
        (None, None) => None,
    }
}

fn join(values: impl Iterator<Item = String>) -> Option<String> {
    let values: Vec<String> = values.collect();
    (!values.is_empty()).then(|| values.join(", "))
}
