use financial_statement_combiner::*;
use std::fs;
use std::path::Path;

fn write_table(root: &Path, document: &str, statement: &str, body: &str) {
    let dir = root.join("openapiscrape").join(document);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{}.csv", statement)), body).unwrap();
}

fn setup_company(root: &Path, policy: OnMissingDivisor) -> CompanyWorkspace {
    let workspace = CompanyWorkspace::open(root);
    workspace
        .save_config(&PipelineConfig::new("ACME", policy))
        .unwrap();

    write_table(
        root,
        "10-K_2022",
        "Financial",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2022,2021\n\
         Financial Multiplier,,,,1000,1000\n\
         Revenue,,Sales,,100,80\n\
         Assets,,Goodwill,intangibles,20,20\n\
         Revenue,,Subtotal,excluded,999,999\n",
    );
    write_table(
        root,
        "10-K_2022",
        "Shares",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2022,2021\n\
         Capital,,Number of shares,,10,8\n",
    );
    write_table(
        root,
        "10-K_2023",
        "Financial",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2023,2022\n\
         Financial Multiplier,,,,1000,1000\n\
         revenue,,sales,,120,100\n\
         Costs,,Wages,negated,\"(5)\",4\n",
    );
    write_table(
        root,
        "10-K_2023",
        "Shares",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2023,2022\n\
         Capital,,Number of shares,,12,10\n",
    );
    workspace
}

#[test]
fn test_workspace_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);

    let report = workspace.run()?;
    assert_eq!(report.documents, 2);

    let dataset = CombinedDataset::read_csv(&workspace.combined_path())?;
    assert_eq!(
        dataset.columns,
        vec![
            "10-K_2022.2021",
            "10-K_2022.2022",
            "10-K_2023.2022",
            "10-K_2023.2023"
        ]
    );

    let sales: Vec<&CombinedRecord> = dataset
        .records
        .iter()
        .filter(|r| r.item.eq_ignore_ascii_case("sales"))
        .collect();
    assert_eq!(sales.len(), 1);
    let sales = sales[0];
    assert_eq!(sales.value("10-K_2022.2022"), Some(10_000.0));
    assert_eq!(sales.value("10-K_2022.2021"), Some(10_000.0));
    assert_eq!(sales.value("10-K_2023.2023"), Some(10_000.0));

    let wages = dataset.find(StatementType::Financial, "Costs", "Wages").unwrap();
    assert_eq!(wages.note, "negated");
    assert_eq!(wages.cell("10-K_2023.2023"), "4.17e+02");
    assert_eq!(wages.value("10-K_2023.2022"), Some(-400.0));
    assert!(wages.values.keys().all(|k| k.starts_with("10-K_2023.")));

    assert!(dataset
        .records
        .iter()
        .all(|r| r.item != "Subtotal" && !r.item.contains("Number of shares")));

    let share_counts = &report.side_tables.share_counts["ACME"];
    assert_eq!(share_counts["10-K_2023.2023"], Some(12.0));
    assert!(workspace.root().join("share_counts.json").exists());
    assert!(workspace.root().join("factor_tooltips.json").exists());

    let notes = NoteAssignmentStore::load(&workspace.note_store_path())?;
    assert_eq!(
        notes.get(&NoteKey::new(StatementType::Financial, "Assets", "Goodwill")),
        Some("intangibles")
    );
    Ok(())
}

#[test]
fn test_rerun_is_byte_identical() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);

    workspace.run()?;
    let first = fs::read(workspace.combined_path())?;
    let first_order = fs::read(workspace.category_order_path())?;

    workspace.run()?;
    let second = fs::read(workspace.combined_path())?;
    let second_order = fs::read(workspace.category_order_path())?;

    assert_eq!(first, second);
    assert_eq!(first_order, second_order);
    Ok(())
}

#[test]
fn test_canonical_positions_survive_new_rows() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    workspace.run()?;

    let before = CanonicalOrder::load(&workspace.category_order_path(), &workspace.item_order_path())?;
    let positions: Vec<(StatementType, String, Option<usize>)> = before
        .categories()
        .iter()
        .map(|c| {
            (
                c.statement,
                c.category.clone(),
                before.category_position(c.statement, &c.category),
            )
        })
        .collect();

    write_table(
        dir.path(),
        "10-K_2024",
        "Financial",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2024\n\
         Aardvark Holdings,,Misc,,1\n\
         Revenue,,Sales,,130\n",
    );
    write_table(
        dir.path(),
        "10-K_2024",
        "Shares",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2024\n\
         Capital,,Number of shares,,13\n",
    );
    workspace.run()?;

    let after = CanonicalOrder::load(&workspace.category_order_path(), &workspace.item_order_path())?;
    for (statement, category, position) in positions {
        assert_eq!(after.category_position(statement, &category), position);
    }
    assert_eq!(
        after.category_position(StatementType::Financial, "Aardvark Holdings"),
        Some(before.categories().len())
    );

    let dataset = CombinedDataset::read_csv(&workspace.combined_path())?;
    let last = dataset.records.last().unwrap();
    assert_eq!(last.category, "Aardvark Holdings");
    Ok(())
}

#[test]
fn test_strict_policy_aborts_without_writing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    write_table(
        dir.path(),
        "10-K_2023",
        "Shares",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2023,2022\n\
         Capital,,Number of shares,,,10\n",
    );

    let err = workspace.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingReference);
    assert!(!workspace.combined_path().exists());
    assert!(!workspace.note_store_path().exists());
    assert!(!workspace.category_order_path().exists());
    Ok(())
}

#[test]
fn test_skip_policy_leaves_period_undivided() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::SkipPeriod);
    write_table(
        dir.path(),
        "10-K_2023",
        "Shares",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2023,2022\n\
         Capital,,Number of shares,,0,10\n",
    );

    let report = workspace.run()?;
    let sales = report
        .dataset
        .find(StatementType::Financial, "Revenue", "Sales")
        .unwrap();
    assert_eq!(sales.value("10-K_2023.2023"), Some(120_000.0));
    assert_eq!(sales.value("10-K_2023.2022"), Some(10_000.0));
    Ok(())
}

#[test]
fn test_blank_multiplier_is_configuration_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    write_table(
        dir.path(),
        "10-K_2022",
        "Financial",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2022,2021\n\
         Financial Multiplier,,,,1000,\n\
         Revenue,,Sales,,100,80\n",
    );

    let err = workspace.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("2021"));
    Ok(())
}

#[test]
fn test_reviewer_note_applies_across_documents() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    workspace.run()?;

    let mut notes = NoteAssignmentStore::load(&workspace.note_store_path())?;
    notes.set(NoteKey::new(StatementType::Financial, "Revenue", "Sales"), "excluded");
    notes.flush()?;

    let report = workspace.run()?;
    assert!(report
        .dataset
        .find(StatementType::Financial, "Revenue", "Sales")
        .is_none());
    Ok(())
}

#[test]
fn test_column_labels_rename_output_columns() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);

    let mut assignment = ColumnAssignment::new();
    assignment.set("10-K_2023", 0, "FY2023");
    assignment.save(&workspace.column_labels_path())?;

    let report = workspace.run()?;
    assert!(report.dataset.columns.contains(&"10-K_2023.FY2023".to_string()));
    assert!(!report.dataset.columns.contains(&"10-K_2023.2023".to_string()));
    Ok(())
}

#[test]
fn test_regenerate_order_keeps_recorded_entries() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    workspace.run()?;
    let before = CanonicalOrder::load(&workspace.category_order_path(), &workspace.item_order_path())?;

    let order = workspace.regenerate_order()?;
    assert_eq!(order.categories(), before.categories());
    assert_eq!(order.items(), before.items());
    Ok(())
}

#[test]
fn test_extraction_response_feeds_pipeline() -> anyhow::Result<()> {
    let response = "```\nmultiplier: 1000\nCATEGORY,SUBCATEGORY,ITEM,NOTE,31.12.2022\nRevenue,,Sales,,\"1,500\"\n```";
    let parsed = parse_extraction_response(response, "AR_2022", StatementType::Income)?;

    let mut notes = NoteAssignmentStore::in_memory();
    let mut order = CanonicalOrder::new();
    let config = PipelineConfig::new("ACME", OnMissingDivisor::Fail)
        .with_normalization(NormalizationMode::Reported);
    let output = combine_documents(
        config,
        &[DocumentInput::new("AR_2022.pdf", vec![parsed.table])],
        &mut notes,
        &mut order,
    )?;

    let sales = output
        .dataset
        .find(StatementType::Income, "Revenue", "Sales")
        .unwrap();
    assert_eq!(sales.cell("AR_2022.31.12.2022"), "1.50e+06");
    Ok(())
}

#[test]
fn test_cleared_note_stays_cleared_on_rerun() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    let key = NoteKey::new(StatementType::Financial, "Revenue", "Subtotal");

    let report = workspace.run()?;
    assert!(report.dataset.find(StatementType::Financial, "Revenue", "Subtotal").is_none());

    let mut notes = NoteAssignmentStore::load(&workspace.note_store_path())?;
    assert_eq!(notes.get(&key), Some("excluded"));
    notes.set(key.clone(), "");
    notes.flush()?;

    let report = workspace.run()?;
    let subtotal = report
        .dataset
        .find(StatementType::Financial, "Revenue", "Subtotal")
        .unwrap();
    assert_eq!(subtotal.note, "");

    let notes = NoteAssignmentStore::load(&workspace.note_store_path())?;
    assert_eq!(notes.get(&key), Some(""));
    Ok(())
}

#[test]
fn test_failed_write_keeps_previous_outputs() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let workspace = setup_company(dir.path(), OnMissingDivisor::Fail);
    workspace.run()?;
    let combined = fs::read(workspace.combined_path())?;
    let notes = fs::read(workspace.note_store_path())?;

    write_table(
        dir.path(),
        "10-K_2024",
        "Financial",
        "CATEGORY,SUBCATEGORY,ITEM,NOTE,2024\n\
         Other,,Fees,excluded,7\n",
    );
    fs::create_dir(dir.path().join("share_counts.tmp"))?;

    let err = workspace.run().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(fs::read(workspace.combined_path())?, combined);
    assert_eq!(fs::read(workspace.note_store_path())?, notes);
    assert!(!dir.path().join("combined.tmp").exists());
    Ok(())
}
