//! Extraction and classification over realistic gazette notices.

use std::str::FromStr;

use gazette_parsing::{FieldExtractor, RelevanceClassifier, Signal, format_brl};
use rust_decimal::Decimal;

const RPV_NOTICE: &str = "\
Processo 1234567-89.2024.1.01.0001 - Cumprimento de Sentença contra a Fazenda Pública
Exequente: JOSÉ CARLOS PEREIRA - Executado: Instituto Nacional do Seguro Social - INSS
Advogado: FERNANDA GOMES RIBEIRO (OAB: 234.567/SP)
Expeça-se Requisição de Pequeno Valor para pagamento do valor principal bruto: R$ 1.234,56,
valor principal líquido: R$ 1.111,11, juros moratórios: R$ 45,00 e honorários advocatícios: R$ 123,45.
Data de Disponibilização: 14/03/2024";

const UNRELATED_NOTICE: &str = "\
Processo 7654321-00.2023.8.26.0100 - Procedimento Comum Cível
Requerente: JOÃO PEDRO ALVES - Requerido: Banco Exemplo S/A
Designo audiência de conciliação para 12/11/2024. Intimem-se.";

#[test]
fn rpv_notice_is_extracted_and_accepted() {
    let extractor = FieldExtractor::new();
    let classifier = RelevanceClassifier::default();

    let fields = extractor.extract(RPV_NOTICE).unwrap();
    assert_eq!(fields.case_number.as_str(), "1234567-89.2024.1.01.0001");
    assert_eq!(
        fields.gross_principal,
        Some(Decimal::from_str("1234.56").unwrap())
    );
    assert_eq!(format_brl(fields.gross_principal.unwrap()), "1.234,56");
    assert_eq!(
        fields.claimant_names,
        Some(vec!["JOSÉ CARLOS PEREIRA".to_string()])
    );
    assert_eq!(
        fields.attorney_names,
        Some(vec!["FERNANDA GOMES RIBEIRO".to_string()])
    );

    let decision = classifier.classify(&fields, &fields.raw_text);
    assert!(decision.accepted, "score was {}", decision.score);
    assert_eq!(decision.matched_signals, Signal::ALL.to_vec());
}

#[test]
fn unrelated_notice_is_rejected() {
    let extractor = FieldExtractor::new();
    let classifier = RelevanceClassifier::default();

    let fields = extractor.extract(UNRELATED_NOTICE).unwrap();
    assert_eq!(fields.case_number.as_str(), "7654321-00.2023.8.26.0100");

    let decision = classifier.classify(&fields, &fields.raw_text);
    assert!(!decision.accepted);
    assert!(!decision.matched_signals.contains(&Signal::DomainIndicator));
    assert!(!decision.matched_signals.contains(&Signal::InstitutionalParty));
    assert!(decision.score < classifier.threshold());
}
