// Menu page extraction
// Turns a rendered menu page into per-day meal lists and the allergen legend.
// Missing fields are masked as `None`; only selector compilation can fail.

use chrono::NaiveDate;
use htmlentity::entity::{decode, ICodedDataTrait};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::menu::{Allergen, DayExtract, Diet, Meal, PriceByGroup};

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid selector {selector}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

// Matches opening, closing and self-closing tags, including their attributes
const TAG_PATTERN: &str =
    r#"</?\w+((\s+[\w:-]+(\s*=\s*(?:".*?"|'.*?'|[^'">\s]+))?)+\s*|\s*)/?>"#;

const MEAL_DETAIL: &str = ".mensa_menu_detail";
const MEAL_NAME: &str = ".menu_name";
const MEAL_PRICE: &str = ".menu_preis";
const MEAL_LOCATION: &str = ".menu_art";
const CLOSED_MARKER: &str = ".mensa_menu_geschlossen";
const LEGEND: &str = ".mbf_content";

const DIET_ATTR: &str = "data-arten";
const ALLERGEN_CODE_ATTR: &str = "data-wert";
const CLOSED_WORDING: [&str; 2] = ["geschlossen", "closed"];

// A parsed menu page. Not `Send`; parse it after the last await point.
pub struct MenuDocument {
    html: Html,
}

impl MenuDocument {
    pub fn parse(markup: &str) -> Self {
        Self {
            html: Html::parse_document(markup),
        }
    }
}

pub struct MenuExtractor {
    meal_detail: Selector,
    meal_name: Selector,
    meal_price: Selector,
    meal_location: Selector,
    closed_marker: Selector,
    legend: Selector,
    tag_pattern: Regex,
}

impl MenuExtractor {
    pub fn new() -> Result<Self, ExtractionError> {
        Ok(Self {
            meal_detail: compile(MEAL_DETAIL)?,
            meal_name: compile(MEAL_NAME)?,
            meal_price: compile(MEAL_PRICE)?,
            meal_location: compile(MEAL_LOCATION)?,
            closed_marker: compile(CLOSED_MARKER)?,
            legend: compile(LEGEND)?,
            tag_pattern: Regex::new(TAG_PATTERN)?,
        })
    }

    /// Reads the allergen legend. A page without a legend yields an empty list.
    pub fn allergens(&self, document: &MenuDocument) -> Vec<Allergen> {
        let Some(legend) = document.html.select(&self.legend).next() else {
            return Vec::new();
        };

        legend
            .child_elements()
            .map(|entry| Allergen {
                code: entry
                    .value()
                    .attr(ALLERGEN_CODE_ATTR)
                    .unwrap_or_default()
                    .to_string(),
                name: entry
                    .child_elements()
                    .nth(1)
                    .map(|name| name.inner_html())
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Extracts the meals listed for `date`, matching allergens against `legend`.
    pub fn day(
        &self,
        document: &MenuDocument,
        date: NaiveDate,
        legend: &[Allergen],
    ) -> Result<DayExtract, ExtractionError> {
        // the `.mb_day` variant is the date header, not the meal container
        let container_selector = compile(&format!(
            "[data-day=\"{}\"]:not(.mb_day)",
            date.format("%Y-%m-%d")
        ))?;

        let Some(container) = document.html.select(&container_selector).next() else {
            return Ok(DayExtract::Missing);
        };

        if self.is_closed(container) {
            return Ok(DayExtract::Closed);
        }

        let meals = container
            .select(&self.meal_detail)
            .map(|detail| self.meal(detail, legend))
            .collect();

        Ok(DayExtract::Open(meals))
    }

    fn is_closed(&self, container: ElementRef<'_>) -> bool {
        container.select(&self.closed_marker).next().is_some_and(|marker| {
            let markup = marker.inner_html().to_lowercase();
            CLOSED_WORDING.iter().any(|wording| markup.contains(wording))
        })
    }

    fn meal(&self, detail: ElementRef<'_>, legend: &[Allergen]) -> Meal {
        let name_element = detail.select(&self.meal_name).next();

        let name = name_element.map(|element| self.clean_name(&element.inner_html()));
        let price = detail
            .select(&self.meal_price)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string());
        let location = detail
            .select(&self.meal_location)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string());

        let price_by_group = price
            .as_deref()
            .map(parse_price_groups)
            .unwrap_or_default();
        let diet = Diet::from_codes(detail.value().attr(DIET_ATTR).unwrap_or_default());

        // allergen codes are read from the raw text, before any cleaning
        let raw_name = name_element
            .map(|element| element.text().collect::<String>())
            .unwrap_or_default();

        Meal {
            name,
            price,
            price_by_group,
            vegetarian: diet.vegetarian(),
            vegan: diet.vegan(),
            location,
            allergens: match_allergens(&raw_name, legend),
        }
    }

    /// Strips markup from a name field and normalises the remaining fragments.
    ///
    /// Fragments that are empty, parenthetical, or leftover attribute text are
    /// dropped; the rest are joined with `", "`.
    pub fn clean_name(&self, inner_html: &str) -> String {
        let joined = self
            .tag_pattern
            .split(inner_html)
            .map(str::trim)
            .filter(|fragment| {
                !fragment.is_empty() && !fragment.starts_with('(') && !fragment.contains('=')
            })
            .collect::<Vec<_>>()
            .join(", ");

        decode_entities(&collapse_repeated_symbols(&joined))
    }
}

/// Splits `"3,50 € / 4,80 € / 6,10 €"` into student, employee and guest prices.
/// Anything other than exactly three numeric segments gives all zeros.
pub fn parse_price_groups(raw: &str) -> PriceByGroup {
    let normalized = raw.replace('€', "").replace(',', ".");
    let segments: Vec<&str> = normalized.split('/').collect();

    let [students, employees, guests] = segments.as_slice() else {
        return PriceByGroup::default();
    };

    match (
        parse_amount(students),
        parse_amount(employees),
        parse_amount(guests),
    ) {
        (Some(students), Some(employees), Some(guests)) => PriceByGroup {
            students,
            employees,
            guests,
        },
        _ => PriceByGroup::default(),
    }
}

/// Legend entries whose code occurs anywhere in `raw_text`.
///
/// Plain substring matching: `a1` also matches inside `a10`.
pub fn match_allergens(raw_text: &str, legend: &[Allergen]) -> Vec<Allergen> {
    legend
        .iter()
        .filter(|allergen| !allergen.code.is_empty() && raw_text.contains(&allergen.code))
        .cloned()
        .collect()
}

fn parse_amount(segment: &str) -> Option<f64> {
    segment.trim().parse::<f64>().ok()
}

fn compile(css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css).map_err(|e| ExtractionError::InvalidSelector {
        selector: css.to_string(),
        reason: format!("{e:?}"),
    })
}

// Collapses runs of the same non-word character, e.g. ",," -> ","
fn collapse_repeated_symbols(input: &str) -> String {
    let mut collapsed = String::with_capacity(input.len());
    let mut previous: Option<char> = None;

    for c in input.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if !is_word && previous == Some(c) {
            continue;
        }
        collapsed.push(c);
        previous = Some(c);
    }

    collapsed
}

// Decodes entities only; any markup left in the text is kept as-is
fn decode_entities(text: &str) -> String {
    decode(text.as_bytes())
        .to_string()
        .unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const SAMPLE_PAGE: &str = include_str!("../samples/menu_week.html");

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn extract(day: u32) -> DayExtract {
        let extractor = MenuExtractor::new().unwrap();
        let document = MenuDocument::parse(SAMPLE_PAGE);
        let legend = extractor.allergens(&document);
        extractor.day(&document, date(day), &legend).unwrap()
    }

    fn open_meals(day: u32) -> Vec<Meal> {
        match extract(day) {
            DayExtract::Open(meals) => meals,
            other => panic!("expected open day, got {:?}", other),
        }
    }

    fn codes(meal: &Meal) -> Vec<&str> {
        meal.allergens.iter().map(|a| a.code.as_str()).collect()
    }

    #[test_case("<b>Schnitzel</b> (Art. 12)", "Schnitzel"; "#1 Tags and parenthetical dropped")]
    #[test_case("Gemüsecurry<br><small>(a1,g)</small>", "Gemüsecurry"; "#2 Allergen note dropped")]
    #[test_case("<span class=\"x\">Pasta</span> mit <b>Pesto</b>", "Pasta, mit, Pesto"; "#3 Fragments joined")]
    #[test_case("Pasta,<br>Tomatensoße", "Pasta, Tomatensoße"; "#4 Doubled commas collapsed")]
    #[test_case("Wiener Schnitzel &amp; Pommes", "Wiener Schnitzel & Pommes"; "#5 Entities decoded")]
    #[test_case("<img src=\"a.png\"/>Reis", "Reis"; "#6 Self-closing tag")]
    #[test_case("", ""; "#7 Empty field")]
    fn test_clean_name(inner_html: &str, expected: &str) {
        let extractor = MenuExtractor::new().unwrap();
        assert_eq!(extractor.clean_name(inner_html), expected);
    }

    #[test_case("3,50 € / 4,80 € / 6,10 €", 3.50, 4.80, 6.10; "#1 Three groups")]
    #[test_case("3,50 €", 0.0, 0.0, 0.0; "#2 Single price")]
    #[test_case("1/2", 0.0, 0.0, 0.0; "#3 Two segments")]
    #[test_case("1/2/3/4", 0.0, 0.0, 0.0; "#4 Four segments")]
    #[test_case("a / b / c", 0.0, 0.0, 0.0; "#5 Not numeric")]
    #[test_case("2.00€/3.00€/4.00€", 2.0, 3.0, 4.0; "#6 No spaces")]
    fn test_parse_price_groups(raw: &str, students: f64, employees: f64, guests: f64) {
        let prices = parse_price_groups(raw);
        assert_eq!(
            prices,
            PriceByGroup {
                students,
                employees,
                guests
            }
        );
    }

    #[test]
    fn test_collapse_repeated_symbols() {
        assert_eq!(collapse_repeated_symbols("a,,  b"), "a, b");
        assert_eq!(collapse_repeated_symbols("aa--bb"), "aa-bb");
        assert_eq!(collapse_repeated_symbols(", , "), ", , ");
    }

    #[test_case("Wiener Schnitzel &amp; Pommes", "Wiener Schnitzel & Pommes"; "#1 Named entity")]
    #[test_case("Soße &#8211; hausgemacht", "Soße – hausgemacht"; "#2 Numeric entity")]
    #[test_case("Reis <!-- Tagesangebot --> &amp; Gemüse", "Reis <!-- Tagesangebot --> & Gemüse"; "#3 Leftover markup is kept")]
    #[test_case("Kartoffelsuppe", "Kartoffelsuppe"; "#4 Nothing to decode")]
    fn test_decode_entities(text: &str, expected: &str) {
        assert_eq!(decode_entities(text), expected);
    }

    #[test]
    fn test_allergen_legend() {
        let extractor = MenuExtractor::new().unwrap();
        let legend = extractor.allergens(&MenuDocument::parse(SAMPLE_PAGE));

        let pairs: Vec<(&str, &str)> = legend
            .iter()
            .map(|a| (a.code.as_str(), a.name.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a1", "Gluten"),
                ("a10", "Dinkel"),
                ("d", "Fisch"),
                ("g", "Milch &amp; Laktose"),
            ]
        );
    }

    #[test]
    fn test_allergen_legend_missing_or_partial() {
        let extractor = MenuExtractor::new().unwrap();
        let none = MenuDocument::parse("<html><body><p>nothing here</p></body></html>");
        assert!(extractor.allergens(&none).is_empty());

        let partial = MenuDocument::parse(
            r#"<div class="mbf_content"><div><span>x</span></div></div>"#,
        );
        assert_eq!(
            extractor.allergens(&partial),
            vec![Allergen {
                code: String::new(),
                name: String::new()
            }]
        );
    }

    #[test]
    fn test_open_day_meals() {
        let meals = open_meals(9);
        assert_eq!(meals.len(), 2);

        let curry = &meals[0];
        assert_eq!(curry.name.as_deref(), Some("Gemüsecurry mit Basmatireis"));
        assert_eq!(curry.price.as_deref(), Some("3,50 € / 4,80 € / 6,10 €"));
        assert_eq!(curry.price_by_group.students, 3.50);
        assert_eq!(curry.price_by_group.employees, 4.80);
        assert_eq!(curry.price_by_group.guests, 6.10);
        assert!(curry.vegetarian);
        assert!(!curry.vegan);
        assert_eq!(curry.location.as_deref(), Some("Mensa"));
        assert_eq!(codes(curry), vec!["a1", "g"]);

        let fish = &meals[1];
        assert_eq!(
            fish.name.as_deref(),
            Some("Seelachsfilet, Dillsoße & Salzkartoffeln")
        );
        assert!(!fish.vegetarian);
        assert_eq!(codes(fish), vec!["a1", "d"]);
    }

    #[test]
    fn test_header_variant_is_not_the_container() {
        // the mb_day header for the same date comes first in the page
        assert_eq!(open_meals(10).len(), 1);
    }

    #[test]
    fn test_vegan_meal_without_group_prices() {
        let meals = open_meals(10);
        let dal = &meals[0];
        assert_eq!(dal.name.as_deref(), Some("Linsen-Dal"));
        assert!(dal.vegan);
        assert!(dal.vegetarian);
        assert_eq!(dal.price.as_deref(), Some("2,90 €"));
        assert_eq!(dal.price_by_group, PriceByGroup::default());
        assert_eq!(dal.location.as_deref(), Some("Cafeteria"));
    }

    #[test]
    fn test_substring_allergen_matching_is_preserved() {
        // `a1` is a prefix of `a10`, so both match
        let meals = open_meals(10);
        assert_eq!(codes(&meals[0]), vec!["a1", "a10"]);
    }

    #[test]
    fn test_missing_fields_are_masked() {
        let meals = open_meals(11);
        assert_eq!(meals.len(), 2);

        let currywurst = &meals[0];
        assert_eq!(currywurst.name.as_deref(), Some("Currywurst mit Pommes"));
        assert_eq!(currywurst.price, None);
        assert_eq!(currywurst.price_by_group, PriceByGroup::default());
        assert_eq!(codes(currywurst), vec!["g"]);

        let nameless = &meals[1];
        assert_eq!(nameless.name, None);
        assert!(nameless.allergens.is_empty());
        assert_eq!(nameless.price_by_group.guests, 2.0);
    }

    #[test]
    fn test_closed_day() {
        assert_eq!(extract(12), DayExtract::Closed);
    }

    #[test]
    fn test_container_without_meals_is_open_and_empty() {
        assert_eq!(extract(13), DayExtract::Open(vec![]));
    }

    #[test]
    fn test_missing_container() {
        assert_eq!(extract(14), DayExtract::Missing);
    }

    #[test]
    fn test_closure_marker_needs_closure_wording() {
        let extractor = MenuExtractor::new().unwrap();
        let document = MenuDocument::parse(
            r#"<div data-day="2025-06-09"><div class="mensa_menu_geschlossen">Sonderöffnung</div></div>"#,
        );
        assert_eq!(
            extractor.day(&document, date(9), &[]).unwrap(),
            DayExtract::Open(vec![])
        );

        let english = MenuDocument::parse(
            r#"<div data-day="2025-06-09"><div class="mensa_menu_geschlossen">Canteen Closed</div></div>"#,
        );
        assert_eq!(
            extractor.day(&english, date(9), &[]).unwrap(),
            DayExtract::Closed
        );
    }

    #[test]
    fn test_empty_legend_code_never_matches() {
        let legend = vec![
            Allergen {
                code: String::new(),
                name: "unknown".to_string(),
            },
            Allergen {
                code: "g".to_string(),
                name: "Milch".to_string(),
            },
        ];
        let matched = match_allergens("Milchreis (g)", &legend);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].code, "g");
    }

    #[test]
    fn test_vegan_implies_vegetarian_for_every_meal() {
        for day in 9..=13 {
            if let DayExtract::Open(meals) = extract(day) {
                for meal in meals {
                    assert!(!meal.vegan || meal.vegetarian);
                }
            }
        }
    }
}
