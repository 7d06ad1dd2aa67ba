//! List commands implementation

use flashmon_core::chip::FAMILIES;

/// List all supported flash chips
pub fn list_chips(vendor_filter: Option<&str>) {
    println!("Supported flash chips:");
    println!();
    println!(
        "{:<6} {:<8} {:<18} {:>10} {:>12} {:>8}",
        "Digit", "Vendor", "Name", "Size", "ID", "Sectors"
    );
    println!("{}", "-".repeat(67));

    for family in FAMILIES {
        // Apply vendor filter if specified
        if let Some(vendor) = vendor_filter {
            if !family.vendor.to_lowercase().contains(&vendor.to_lowercase()) {
                continue;
            }
        }

        let id = format!("{:04X} {:04X}", family.manufacturer_id, family.device_id);
        println!(
            "{:<6} {:<8} {:<18} {:>10} {:>12} {:>8}",
            char::from(family.digit),
            family.vendor,
            family.name,
            format_size(family.size),
            id,
            family.sectors.len()
        );
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(1024 * 1024), "1 MiB");
        assert_eq!(format_size(16 * 1024), "16 KiB");
        assert_eq!(format_size(12), "12 B");
    }
}
