//! Tests for Detector

use super::*;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use rstest::rstest;

fn detect_all(samples: &[Value]) -> (Kind, Option<MungeFn>) {
    let mut detector = Detector::new();
    for sample in samples {
        detector.sample(sample);
    }
    detector.detect().expect("detect should not fail")
}

fn s(v: &str) -> Value {
    Value::String(v.to_string())
}

mod resolution_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case::mixed_int(vec![Value::Int64(1), s("2"), s("3")], Kind::Int)]
    #[case::decimal_text(vec![s("1.0"), s("2.0"), s("3.0"), s("4"), Value::Null], Kind::Decimal)]
    #[case::bools(
        vec![Value::Bool(true), Value::Bool(false), s("true"), s("false"), s("yes"), s("no"), s("")],
        Kind::Bool
    )]
    #[case::no_samples(vec![], Kind::Null)]
    #[case::all_null(vec![Value::Null, Value::Null], Kind::Null)]
    #[case::empty_string(vec![s("")], Kind::Text)]
    #[case::words(vec![s("alpha"), s("beta")], Kind::Text)]
    #[case::typed_ints(vec![Value::Int64(1), Value::Int64(2)], Kind::Decimal)]
    #[case::typed_floats(vec![Value::Float64(1.5), Value::Int64(2)], Kind::Float)]
    #[case::int_text(vec![s("10"), s("-20"), s("30")], Kind::Int)]
    #[case::float_text_exponent(vec![s("1e3"), s("2.5")], Kind::Decimal)]
    #[case::bytes(vec![Value::Bytes(vec![0, 1])], Kind::Text)]
    #[case::dates(vec![s("2024-01-02"), s("2024-02-03")], Kind::Date)]
    #[case::times(vec![s("10:11:12"), s("23:59:59")], Kind::Time)]
    #[case::datetimes(vec![s("2024-01-02T10:11:12Z"), s("2024-01-02 10:11:12")], Kind::Datetime)]
    #[case::typed_date(vec![Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())], Kind::Datetime)]
    #[case::bool_then_word(vec![s("yes"), s("maybe")], Kind::Text)]
    fn test_detect(#[case] samples: Vec<Value>, #[case] expected: Kind) {
        let (kind, _) = detect_all(&samples);
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_zero_and_one_stay_int_over_bool() {
        let (kind, munge) = detect_all(&[s("0"), s("1"), s("1")]);
        assert_eq!(kind, Kind::Int);
        assert!(munge.is_none());
    }

    #[test]
    fn test_date_followed_by_datetime_is_text() {
        let (kind, _) = detect_all(&[s("2024-01-02"), s("2024-01-02T10:11:12Z")]);
        assert_eq!(kind, Kind::Text);
    }
}

mod monotonic_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_candidates_never_grow() {
        let sequences: Vec<Vec<Value>> = vec![
            vec![s("1"), Value::Int64(2), s("3.5"), s("x")],
            vec![Value::Null, s(""), s("true"), Value::Bool(false), s("1")],
            vec![s("2024-01-02"), Value::Null, s("10:00:00"), s("")],
            vec![Value::Float64(1.0), s("1"), Value::Int64(1), Value::Bytes(vec![1])],
            vec![Value::Decimal("1.25".into()), s("4"), Value::Null],
        ];

        for samples in sequences {
            let mut detector = Detector::new();
            let mut previous = detector.candidates();
            for sample in &samples {
                detector.sample(sample);
                let current = detector.candidates();
                assert!(
                    current.is_subset(&previous),
                    "candidates grew from {:?} to {:?} after {:?}",
                    previous,
                    current,
                    sample
                );
                previous = current;
            }
        }
    }

    #[test]
    fn test_nulls_and_empty_strings_do_not_narrow() {
        let mut detector = Detector::new();
        let initial = detector.candidates();
        detector.sample(&Value::Null);
        detector.sample(&s(""));
        assert_eq!(detector.candidates(), initial);
    }
}

mod munge_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_datetime_munge_returns_timestamp() {
        let (kind, munge) = detect_all(&[s("2024-01-02T10:11:12Z")]);
        assert_eq!(kind, Kind::Datetime);
        let munge = munge.expect("datetime has a munge fn");

        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 10, 11, 12).unwrap();
        assert_eq!(munge(&s("2024-01-02T10:11:12Z")).unwrap(), Value::DateTime(expected));
        assert_eq!(munge(&s("2024-01-02 10:11:12")).unwrap(), Value::DateTime(expected));
        assert_eq!(munge(&Value::Null).unwrap(), Value::Null);
        assert_eq!(munge(&s("")).unwrap(), Value::Null);
        assert!(munge(&s("not a time")).is_err());
    }

    #[test]
    fn test_date_munge_returns_canonical_text() {
        let (kind, munge) = detect_all(&[s("02 Jan 2024"), s("15 Mar 2024")]);
        assert_eq!(kind, Kind::Date);
        let munge = munge.expect("date has a munge fn");
        assert_eq!(munge(&s("15 Mar 2024")).unwrap(), s("2024-03-15"));
        assert_eq!(munge(&s("2024-03-16")).unwrap(), s("2024-03-16"));
    }

    #[test]
    fn test_time_munge_returns_canonical_text() {
        let (kind, munge) = detect_all(&[s("3:04 PM")]);
        assert_eq!(kind, Kind::Time);
        let munge = munge.expect("time has a munge fn");
        assert_eq!(munge(&s("3:04 PM")).unwrap(), s("15:04:00"));
        let time = NaiveTime::from_hms_opt(1, 2, 3).unwrap();
        assert_eq!(munge(&Value::Time(time)).unwrap(), s("01:02:03"));
    }
}

mod detect_kinds_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_detect_kinds_per_column() {
        let records = vec![
            vec![s("1"), s("alice"), s("2024-01-02"), Value::Null],
            vec![s("2"), s("bob"), s("2024-01-03"), Value::Null],
            vec![s("3"), s("carol"), s("2024-01-04")],
        ];

        let detected = detect_kinds(&records, 100).unwrap();
        assert_eq!(
            detected.kinds,
            vec![Kind::Int, Kind::Text, Kind::Date, Kind::Null]
        );

        let mut record = vec![s("4"), s("dave"), s("2024-01-05"), Value::Null];
        detected.munge(&mut record).unwrap();
        assert_eq!(record[2], s("2024-01-05"));
    }

    #[test]
    fn test_detect_kinds_respects_sample_limit() {
        let records = vec![vec![s("1")], vec![s("2")], vec![s("not a number")]];
        let detected = detect_kinds(&records, 2).unwrap();
        assert_eq!(detected.kinds, vec![Kind::Int]);
    }
}
