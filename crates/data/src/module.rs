// The ten fixed restaurant-operations modules and their source files.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the ten restaurant-operations data domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableModule {
    Menu,
    Inventory,
    PosSales,
    Reservations,
    Reviews,
    HrStaff,
    VendorSupply,
    CrmLoyalty,
    Finance,
    Marketing,
}

impl TableModule {
    /// All modules in display order.
    pub const ALL: [TableModule; 10] = [
        TableModule::Menu,
        TableModule::Inventory,
        TableModule::PosSales,
        TableModule::Reservations,
        TableModule::Reviews,
        TableModule::HrStaff,
        TableModule::VendorSupply,
        TableModule::CrmLoyalty,
        TableModule::Finance,
        TableModule::Marketing,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            TableModule::Menu => "Menu",
            TableModule::Inventory => "Inventory",
            TableModule::PosSales => "POS Sales",
            TableModule::Reservations => "Reservations",
            TableModule::Reviews => "Reviews",
            TableModule::HrStaff => "HR & Staff",
            TableModule::VendorSupply => "Vendor & Supply",
            TableModule::CrmLoyalty => "CRM & Loyalty",
            TableModule::Finance => "Finance & Accounting",
            TableModule::Marketing => "Marketing & Promotions",
        }
    }

    /// Default backing file name inside the data directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            TableModule::Menu => "menu.csv",
            TableModule::Inventory => "inventory.csv",
            TableModule::PosSales => "pos_sales.csv",
            TableModule::Reservations => "reservations.csv",
            TableModule::Reviews => "reviews.csv",
            TableModule::HrStaff => "hr_staff.csv",
            TableModule::VendorSupply => "vendor_supply.csv",
            TableModule::CrmLoyalty => "crm_loyalty.csv",
            TableModule::Finance => "finance_accounting.csv",
            TableModule::Marketing => "marketing_promotions.csv",
        }
    }

    /// Stable machine identifier (matches the serde representation).
    pub fn slug(&self) -> &'static str {
        match self {
            TableModule::Menu => "menu",
            TableModule::Inventory => "inventory",
            TableModule::PosSales => "pos_sales",
            TableModule::Reservations => "reservations",
            TableModule::Reviews => "reviews",
            TableModule::HrStaff => "hr_staff",
            TableModule::VendorSupply => "vendor_supply",
            TableModule::CrmLoyalty => "crm_loyalty",
            TableModule::Finance => "finance",
            TableModule::Marketing => "marketing",
        }
    }

    /// File stem used when a table or search result is downloaded.
    ///
    /// Lowercased display name with `" & "` and spaces folded to `_`,
    /// e.g. "Finance & Accounting" -> "finance_accounting".
    pub fn download_stem(&self) -> String {
        self.display_name()
            .to_lowercase()
            .replace(" & ", "_")
            .replace(' ', "_")
    }
}

impl fmt::Display for TableModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Input did not name any known module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModuleError(pub String);

impl fmt::Display for ParseModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown module '{}'", self.0)
    }
}

impl std::error::Error for ParseModuleError {}

fn fold(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for TableModule {
    type Err = ParseModuleError;

    /// Accepts the display name, slug, file name or variant name,
    /// ignoring case, spaces, `&` and `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = fold(s.trim().trim_end_matches(".csv"));
        if wanted.is_empty() {
            return Err(ParseModuleError(s.to_string()));
        }

        TableModule::ALL
            .into_iter()
            .find(|m| {
                fold(m.display_name()) == wanted
                    || fold(m.slug()) == wanted
                    || fold(m.file_name().trim_end_matches(".csv")) == wanted
                    || fold(&format!("{:?}", m)) == wanted
            })
            .ok_or_else(|| ParseModuleError(s.to_string()))
    }
}
