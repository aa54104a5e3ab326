// Dashboard figures and per-module overviews derived from a registry.

use serde::Serialize;

use crate::error::LoadError;
use crate::module::TableModule;
use crate::registry::Registry;
use crate::schema::parse_number;
use crate::table::Table;

/// Rows shown in a module preview.
pub const PREVIEW_ROWS: usize = 3;

/// Headline numbers. A field is `None` when its table or column is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardMetrics {
    pub total_orders: Option<usize>,
    pub total_sales: Option<f64>,
    pub average_ticket: Option<f64>,
    pub total_cogs: Option<f64>,
    pub financials: Option<FinancialSummary>,
}

/// Profit and loss figures from the Finance & Accounting `Metric`/`Value`
/// rows. Ratios are percentages of gross sales and are `None` when gross
/// sales is zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialSummary {
    pub gross_sales: f64,
    pub total_cogs: f64,
    pub labor_cost: f64,
    pub net_profit: f64,
    pub food_cost_pct: Option<f64>,
    pub labor_cost_pct: Option<f64>,
    pub profit_margin_pct: Option<f64>,
}

impl FinancialSummary {
    /// Read the four headline metrics from a finance table. `None` unless
    /// every one of them is present with a numeric value.
    pub fn from_finance(table: &Table) -> Option<Self> {
        let metric_col = table.column_index("Metric")?;
        let value_col = table.column_index("Value")?;
        let lookup = |name: &str| {
            table.rows().iter().find_map(|row| {
                if row[metric_col].raw().map(str::trim) != Some(name) {
                    return None;
                }
                let cell = &row[value_col];
                cell.as_f64().or_else(|| cell.raw().and_then(parse_number))
            })
        };

        let gross_sales = lookup("Gross_Sales")?;
        let total_cogs = lookup("Total_COGS")?;
        let labor_cost = lookup("Labor_Cost")?;
        let net_profit = lookup("Net_Profit_Before_Tax")?;
        let pct = |part: f64| (gross_sales != 0.0).then(|| part / gross_sales * 100.0);

        Some(Self {
            gross_sales,
            total_cogs,
            labor_cost,
            net_profit,
            food_cost_pct: pct(total_cogs),
            labor_cost_pct: pct(labor_cost),
            profit_margin_pct: pct(net_profit),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub records: usize,
    pub columns: usize,
    pub numeric_columns: usize,
}

impl TableStats {
    pub fn of(table: &Table) -> Self {
        Self {
            records: table.row_count(),
            columns: table.column_count(),
            numeric_columns: table.numeric_column_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleOverview {
    pub module: TableModule,
    pub stats: TableStats,
    pub preview: Table,
}

/// Compute the dashboard from whatever loaded. Never fails.
pub fn dashboard_metrics(registry: &Registry) -> DashboardMetrics {
    let mut metrics = DashboardMetrics::default();

    if let Some(pos) = registry.table(TableModule::PosSales) {
        metrics.total_orders = Some(pos.row_count());
        if pos.column("Total").is_some_and(|c| c.kind.is_numeric()) {
            let totals: Vec<f64> = pos.numeric_values("Total").collect();
            let sum: f64 = totals.iter().sum();
            metrics.total_sales = Some(sum);
            if !totals.is_empty() {
                metrics.average_ticket = Some(sum / totals.len() as f64);
            }
        }
    }

    if let Some(inventory) = registry.table(TableModule::Inventory) {
        if inventory
            .column("Total_Used_Cost")
            .is_some_and(|c| c.kind.is_numeric())
        {
            metrics.total_cogs = Some(inventory.numeric_values("Total_Used_Cost").sum());
        }
    }

    metrics.financials = registry
        .table(TableModule::Finance)
        .and_then(|finance| FinancialSummary::from_finance(finance));

    metrics
}

/// Stats and a short preview of one module, or its load error.
pub fn module_overview(registry: &Registry, module: TableModule) -> Option<Result<ModuleOverview, &LoadError>> {
    registry.get(module).map(|result| match result {
        Ok(table) => Ok(ModuleOverview {
            module,
            stats: TableStats::of(table),
            preview: table.head(PREVIEW_ROWS),
        }),
        Err(e) => Err(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::parse_table;
    use crate::error::LoadReason;

    fn registry(pos: &str, inventory: Option<&str>) -> Registry {
        let mut results = vec![(TableModule::PosSales, Ok(parse_table(pos).unwrap()))];
        match inventory {
            Some(src) => results.push((TableModule::Inventory, Ok(parse_table(src).unwrap()))),
            None => results.push((
                TableModule::Inventory,
                Err(LoadError { module: TableModule::Inventory, reason: LoadReason::Empty }),
            )),
        }
        Registry::from_results(results)
    }

    #[test]
    fn test_dashboard_from_pos_and_inventory() {
        let reg = registry(
            "Order_ID,Total\n1,10.00\n2,\n3,20.00\n",
            Some("Ingredient,Total_Used_Cost\nFlour,4.5\nCheese,5.5\n"),
        );
        let m = dashboard_metrics(&reg);
        assert_eq!(m.total_orders, Some(3));
        assert_eq!(m.total_sales, Some(30.0));
        assert_eq!(m.average_ticket, Some(15.0));
        assert_eq!(m.total_cogs, Some(10.0));
    }

    #[test]
    fn test_missing_columns_are_omitted() {
        let reg = registry("Order_ID,Server\n1,Ana\n", None);
        let m = dashboard_metrics(&reg);
        assert_eq!(m.total_orders, Some(1));
        assert_eq!(m.total_sales, None);
        assert_eq!(m.average_ticket, None);
        assert_eq!(m.total_cogs, None);
        assert_eq!(m.financials, None);
    }

    const FINANCE: &str = "Metric,Value,Period\n\
        Gross_Sales,50000,2024-01\n\
        Total_COGS,14000,2024-01\n\
        Labor_Cost,16000,2024-01\n\
        Net_Profit_Before_Tax,7500,2024-01\n\
        Notes,see ledger,2024-01\n";

    #[test]
    fn test_financial_summary_ratios() {
        let finance = parse_table(FINANCE).unwrap();
        let f = FinancialSummary::from_finance(&finance).unwrap();
        assert_eq!(f.gross_sales, 50000.0);
        assert_eq!(f.total_cogs, 14000.0);
        assert_eq!(f.labor_cost, 16000.0);
        assert_eq!(f.net_profit, 7500.0);
        assert_eq!(f.food_cost_pct, Some(28.0));
        assert_eq!(f.labor_cost_pct, Some(32.0));
        assert_eq!(f.profit_margin_pct, Some(15.0));
    }

    #[test]
    fn test_financial_summary_needs_every_metric() {
        let partial = parse_table("Metric,Value\nGross_Sales,100\nTotal_COGS,30\n").unwrap();
        assert_eq!(FinancialSummary::from_finance(&partial), None);

        let zero = parse_table(
            "Metric,Value\nGross_Sales,0\nTotal_COGS,1\nLabor_Cost,1\nNet_Profit_Before_Tax,-2\n",
        )
        .unwrap();
        let f = FinancialSummary::from_finance(&zero).unwrap();
        assert_eq!(f.food_cost_pct, None);
        assert_eq!(f.profit_margin_pct, None);
    }

    #[test]
    fn test_dashboard_includes_financials() {
        let reg = Registry::from_results([
            (TableModule::PosSales, Ok(parse_table("Order_ID,Total\n1,10.00\n").unwrap())),
            (TableModule::Finance, Ok(parse_table(FINANCE).unwrap())),
        ]);
        let m = dashboard_metrics(&reg);
        assert_eq!(m.financials.map(|f| f.net_profit), Some(7500.0));
    }

    #[test]
    fn test_overview_preview_and_error() {
        let reg = registry("Order_ID,Total\n1,1\n2,2\n3,3\n4,4\n", None);
        let overview = module_overview(&reg, TableModule::PosSales).unwrap().unwrap();
        assert_eq!(overview.preview.row_count(), PREVIEW_ROWS);
        assert_eq!(overview.stats, TableStats { records: 4, columns: 2, numeric_columns: 2 });

        assert!(module_overview(&reg, TableModule::Inventory).unwrap().is_err());
        assert!(module_overview(&reg, TableModule::Menu).is_none());
    }
}
