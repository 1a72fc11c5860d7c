mod authentication;
mod bola;
mod business_flows;
mod function_auth;
mod inventory;
mod misconfiguration;
mod property_auth;
mod resource_consumption;
mod ssrf;
mod unsafe_consumption;

pub use authentication::AuthenticationChecker;
pub use bola::BolaChecker;
pub use business_flows::BusinessFlowChecker;
pub use function_auth::FunctionAuthChecker;
pub use inventory::InventoryChecker;
pub use misconfiguration::MisconfigurationChecker;
pub use property_auth::PropertyAuthChecker;
pub use resource_consumption::ResourceConsumptionChecker;
pub use ssrf::SsrfChecker;
pub use unsafe_consumption::UnsafeConsumptionChecker;

use super::Checker;

/// One checker per OWASP API Top 10 category, in category order.
pub fn all_checkers() -> Vec<Box<dyn Checker>> {
    vec![
        Box::new(BolaChecker),
        Box::new(AuthenticationChecker),
        Box::new(PropertyAuthChecker),
        Box::new(ResourceConsumptionChecker),
        Box::new(FunctionAuthChecker),
        Box::new(BusinessFlowChecker),
        Box::new(SsrfChecker),
        Box::new(MisconfigurationChecker),
        Box::new(InventoryChecker),
        Box::new(UnsafeConsumptionChecker),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwaspCategory;

    #[test]
    fn test_one_checker_per_category() {
        let categories: Vec<_> = all_checkers().iter().map(|c| c.category()).collect();
        assert_eq!(categories, OwaspCategory::ALL.to_vec());
    }

    #[test]
    fn test_checker_names_unique() {
        let mut names: Vec<_> = all_checkers().iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
    }
}
