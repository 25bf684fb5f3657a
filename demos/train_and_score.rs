use attrition_survival::{
    EmployeeTable, FeaturePreprocessor, NamedColumn, RiskScorer, SurvivalCurveExtractor, SurvivalModel,
    SurvivalTarget, TrainedPipeline, TrainingPipeline, ValidationOutcome,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Employee Attrition Survival - Train and Score Example");
    println!("=====================================================\n");

    // Tenure in years; true = left the company, false = still employed
    let years = vec![1.0, 2.0, 3.0, 4.0, 6.0, 6.0, 7.0, 9.0, 9.0, 10.0,
                     2.0, 3.0, 5.0, 5.0, 7.0, 7.0, 8.0, 10.0, 12.0, 15.0];
    let left = vec![true, true, true, false, true, false, true, false, true, false,
                    true, true, false, true, true, false, false, true, false, false];

    let employees = EmployeeTable::new(vec![
        NamedColumn::numeric("EmployeeNumber", (1..=20u32).map(f64::from).collect()),
        NamedColumn::numeric("Age", vec![
            23.0, 26.0, 29.0, 41.0, 33.0, 45.0, 31.0, 50.0, 36.0, 47.0,
            24.0, 27.0, 39.0, 30.0, 34.0, 44.0, 42.0, 38.0, 52.0, 55.0,
        ]),
        NamedColumn::numeric("MonthlyIncome", vec![
            2100.0, 2500.0, 3100.0, 7800.0, 4200.0, 9100.0, 3900.0, 12500.0, 5200.0, 10400.0,
            2300.0, 2800.0, 6900.0, 3600.0, 4800.0, 8700.0, 8100.0, 5900.0, 14000.0, 16200.0,
        ]),
        NamedColumn::categorical("OverTime", vec![
            "Yes", "Yes", "Yes", "No", "Yes", "No", "No", "No", "Yes", "No",
            "Yes", "Yes", "No", "Yes", "No", "No", "No", "Yes", "No", "No",
        ]),
        NamedColumn::categorical("Department", vec![
            "Sales", "Sales", "Research & Development", "Research & Development", "Sales",
            "Human Resources", "Sales", "Research & Development", "Sales", "Research & Development",
            "Sales", "Research & Development", "Human Resources", "Sales", "Research & Development",
            "Research & Development", "Sales", "Sales", "Research & Development", "Human Resources",
        ]),
    ])?;
    let target = SurvivalTarget::new(left.clone(), years)?;

    println!("Data summary:");
    println!("  Employees: {}", target.n_samples());
    println!("  Departures: {}", target.n_events());
    println!("  Longest tenure: {:.1} years\n", target.max_time().unwrap_or(0.0));

    // Fit: preprocess on the training split, boost, validate on the rest
    println!("Training pipeline...");
    let preprocessor = FeaturePreprocessor::new(["Age", "MonthlyIncome"], ["OverTime", "Department"])
        .with_dropped(["EmployeeNumber"]);
    let model = SurvivalModel::new()
        .with_n_estimators(50)
        .with_learning_rate(0.1)
        .with_max_depth(2);
    let run = TrainingPipeline::new(preprocessor, model)
        .with_validation_split(0.25)
        .fit(&employees, &target)?;

    match &run.validation {
        ValidationOutcome::Scored(c) => println!("  Validation {}\n", c),
        ValidationOutcome::Undefined { reason } => println!("  Validation undefined: {}\n", reason),
    }
    let pipeline = run.into_pipeline();

    println!("Feature importance:");
    for row in pipeline.feature_importances()?.rows() {
        println!("  {:<40} {:.4}", row.feature, row.importance);
    }
    println!();

    // Rank the people who are still here
    let active: Vec<usize> = (0..left.len()).filter(|&i| !left[i]).collect();
    let scores = RiskScorer::new(&pipeline).score(&employees.select_rows(&active)?)?;

    println!("Active employees by predicted risk:");
    for (id, risk) in scores.identifiers()?.iter().zip(scores.risks()?) {
        println!("  #{:<4} {:+.4}", id, risk);
    }
    println!();

    // Survival curves for the top 3
    let (top, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, 3)?;
    println!("Survival curves for the {} riskiest:", top.n_rows());
    for id in curves.employees() {
        let points: Vec<String> = curves
            .curve_for(id)
            .map(|p| format!("{:.0}y={:.2}", p.time, p.survival_probability))
            .collect();
        println!("  #{:<4} {}", id, points.join(" "));
    }
    println!();

    // Model artifact round trip
    let json = pipeline.to_json()?;
    let restored: TrainedPipeline = TrainedPipeline::from_json(&json)?;
    let same = restored.predict(&employees)? == pipeline.predict(&employees)?;
    println!("Serialized pipeline: {} bytes, predictions identical after reload: {}", json.len(), same);

    Ok(())
}
